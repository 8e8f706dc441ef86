//! Variable interpolation for topology configurations.
//!
//! Supports variables like:
//! - `${env.VAR_NAME}` - Environment variable
//! - `${stack.name}` - Stack name
//! - `${stack.account}` - Target account id
//! - `${stack.region}` - Target region
//! - `${name}` - Custom variable
//!
//! Unknown variables are left in place by [`VariableContext::interpolate`].

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use tierkit_core::intent::StackSettings;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Stack the configuration describes
    pub stack: StackContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by the caller
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StackContext {
    pub name: String,
    pub account: String,
    pub region: String,
}

impl From<&StackSettings> for StackContext {
    fn from(stack: &StackSettings) -> Self {
        Self {
            name: stack.name.clone(),
            account: stack.account.clone(),
            region: stack.region.clone(),
        }
    }
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with the current process environment.
    pub fn from_process_env() -> Self {
        let mut ctx = Self::new();
        ctx.populate_env();
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    pub fn set_stack(&mut self, stack: &StackSettings) {
        self.stack = stack.into();
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["stack", "name"] => Some(self.stack.name.clone()),
            ["stack", "account"] => Some(self.stack.account.clone()),
            ["stack", "region"] => Some(self.stack.region.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate, replacing variables this context cannot resolve with "".
    pub fn interpolate_or_empty(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.resolve(&caps[1]).unwrap_or_default()
            })
            .to_string()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Names of variables in `input` this context cannot resolve.
    pub fn unresolved_in(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_stack(mut self, stack: &StackSettings) -> Self {
        self.ctx.set_stack(stack);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
