//! Named deployment outputs.

use serde::{Deserialize, Serialize};

use crate::reference::{AttributeTable, PropertyValue};
use crate::{Error, Result};

/// One exported value, possibly still deferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    pub value: PropertyValue,
    pub description: Option<String>,
}

/// Ordered set of exported values.
#[derive(Debug, Clone, Default)]
pub struct OutputSet {
    entries: Vec<OutputEntry>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputEntry> {
        self.entries.iter()
    }

    /// Export `value` under `name`. Names are unique.
    pub fn export(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
        description: Option<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::configuration(&name, "output is already exported"));
        }
        self.entries.push(OutputEntry {
            name,
            value: value.into(),
            description,
        });
        Ok(())
    }

    /// Resolve every output to a concrete, non-empty string.
    pub fn render(&self, table: &AttributeTable) -> Result<RenderedOutputs> {
        let mut rendered = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let value = table.resolve_string(&entry.value)?;
            if value.is_empty() {
                return Err(Error::configuration(&entry.name, "output rendered to an empty string"));
            }
            rendered.push(RenderedOutput {
                name: entry.name.clone(),
                value,
                description: entry.description.clone(),
            });
        }
        Ok(RenderedOutputs(rendered))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedOutput {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Outputs in export order with their concrete values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderedOutputs(Vec<RenderedOutput>);

impl RenderedOutputs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderedOutput> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|o| o.name.as_str()).collect()
    }
}
