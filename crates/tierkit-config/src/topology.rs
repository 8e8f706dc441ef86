//! Topology configuration parsing.

use std::collections::BTreeMap;
use std::path::Path;

use kdl::{KdlDocument, KdlNode};
use tierkit_core::intent::{
    ComputeSpec, DistributionSpec, DomainBinding, GatewaySpec, OriginSpec, StackSettings,
    TopologyIntent,
};
use tracing::{debug, warn};

use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};

/// Read and parse a topology configuration file.
pub fn load_topology(path: impl AsRef<Path>, vars: &VariableContext) -> ConfigResult<TopologyIntent> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_topology(&text, vars)
}

/// Parse a topology configuration from KDL text.
///
/// `stack` and `compute` are required; `gateway`, `site`, `distribution` and
/// `domain` fall back to defaults when absent. String values are interpolated
/// against `vars`, extended with the parsed stack settings.
pub fn parse_topology(kdl: &str, vars: &VariableContext) -> ConfigResult<TopologyIntent> {
    let doc: KdlDocument = kdl.parse()?;

    for node in doc.nodes() {
        let name = node.name().value();
        if !matches!(
            name,
            "stack" | "compute" | "gateway" | "site" | "distribution" | "domain"
        ) {
            debug!(node = %name, "Ignoring unknown configuration node");
        }
    }

    let stack_node = single(&doc, "stack")?
        .ok_or_else(|| ConfigError::MissingField("stack".to_string()))?;
    let stack = parse_stack(stack_node, vars)?;

    let mut vars = vars.clone();
    vars.set_stack(&stack);

    let compute_node = single(&doc, "compute")?
        .ok_or_else(|| ConfigError::MissingField("compute".to_string()))?;
    let compute = parse_compute(compute_node, &vars)?;

    let mut intent = TopologyIntent::new(stack, compute);
    if let Some(node) = single(&doc, "gateway")? {
        intent.gateway = parse_gateway(node, &vars)?;
    }
    if let Some(node) = single(&doc, "site")? {
        intent.origin = parse_site(node, &vars)?;
    }
    if let Some(node) = single(&doc, "distribution")? {
        intent.distribution = parse_distribution(node, &vars)?;
    }
    if let Some(node) = single(&doc, "domain")? {
        let domain = parse_domain(node, &vars)?;
        // Fail on a bad binding here rather than halfway through assembly.
        domain.resolve(&intent.stack)?;
        intent.domain = Some(domain);
    }

    Ok(intent)
}

/// The only node named `name`, if any.
fn single<'a>(doc: &'a KdlDocument, name: &str) -> ConfigResult<Option<&'a KdlNode>> {
    let mut found = doc.nodes().iter().filter(|n| n.name().value() == name);
    let first = found.next();
    if found.next().is_some() {
        return Err(ConfigError::Duplicate(format!("'{name}' node")));
    }
    Ok(first)
}

fn parse_stack(node: &KdlNode, vars: &VariableContext) -> ConfigResult<StackSettings> {
    let name = get_first_string_arg(node)
        .map(|s| vars.interpolate(&s))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField("stack name".to_string()))?;

    let mut stack = StackSettings::new(name);
    if let Some(account) = get_string_prop(node, "account").map(|s| vars.interpolate(&s)) {
        if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::invalid(
                "stack account",
                format!("'{account}' is not a 12-digit account id"),
            ));
        }
        stack = stack.with_account(account);
    }
    if let Some(region) = get_string_prop(node, "region").map(|s| vars.interpolate(&s)) {
        if region.trim().is_empty() {
            return Err(ConfigError::invalid("stack region", "region is empty"));
        }
        stack = stack.with_region(region);
    }
    Ok(stack)
}

fn parse_compute(node: &KdlNode, vars: &VariableContext) -> ConfigResult<ComputeSpec> {
    let name = get_first_string_arg(node).unwrap_or_else(|| "Function".to_string());

    let mut entry = None;
    let mut handler = None;
    let mut runtime = None;
    let mut timeout = None;
    let mut memory = None;
    let mut env = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "entry" => entry = get_first_string_arg(child),
                "handler" => handler = get_first_string_arg(child),
                "runtime" => runtime = get_first_string_arg(child),
                "timeout" => timeout = Some(get_u32_arg(child, "compute timeout")?),
                "memory" => memory = Some(get_u32_arg(child, "compute memory")?),
                "env" => {
                    if let Some(grandchildren) = child.children() {
                        for gc in grandchildren.nodes() {
                            let key = gc.name().value().to_string();
                            if let Some(val) = get_first_string_arg(gc) {
                                env.insert(key, val);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let entry = entry.ok_or_else(|| ConfigError::MissingField(format!("entry for compute '{name}'")))?;
    let handler =
        handler.ok_or_else(|| ConfigError::MissingField(format!("handler for compute '{name}'")))?;

    let mut compute = ComputeSpec::new(vars.interpolate(&entry), vars.interpolate(&handler));
    compute.name = name;
    if let Some(runtime) = runtime {
        compute.runtime = vars.interpolate(&runtime);
    }
    if let Some(timeout) = timeout {
        compute.timeout_seconds = timeout;
    }
    if let Some(memory) = memory {
        compute.memory_mb = memory;
    }
    // Unset variables become empty strings in the deployed environment.
    for (key, raw) in &env {
        for unresolved in vars.unresolved_in(raw) {
            warn!(variable = %key, reference = %unresolved, "Environment value references an unset variable");
        }
        compute.env.insert(key.clone(), vars.interpolate_or_empty(raw));
    }
    Ok(compute)
}

fn parse_gateway(node: &KdlNode, vars: &VariableContext) -> ConfigResult<GatewaySpec> {
    let mut gateway = GatewaySpec::default();
    if let Some(name) = get_first_string_arg(node) {
        gateway.name = name;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "route" => {
                    if let Some(route) = get_first_string_arg(child) {
                        gateway.route_key = route;
                    }
                }
                "cors-origins" | "cors_origins" => {
                    let origins = vars.interpolate_vec(&get_all_string_args(child));
                    if origins.is_empty() {
                        return Err(ConfigError::invalid("gateway cors-origins", "no origins listed"));
                    }
                    gateway.cors_origins = origins;
                }
                "auth-client-id" | "auth_client_id" => {
                    gateway.auth_client_id = get_first_string_arg(child)
                        .and_then(|raw| optional_setting("auth-client-id", &raw, vars));
                }
                "auth-issuer" | "auth_issuer" => {
                    if let Some(issuer) = get_first_string_arg(child) {
                        gateway.auth_issuer = vars.interpolate(&issuer);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(gateway)
}

fn parse_site(node: &KdlNode, vars: &VariableContext) -> ConfigResult<OriginSpec> {
    let mut site = OriginSpec::default();
    if let Some(name) = get_first_string_arg(node) {
        site.name = name;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "content" => {
                    site.content_root = get_first_string_arg(child)
                        .and_then(|raw| optional_setting("site content", &raw, vars));
                }
                "index" => {
                    if let Some(index) = get_first_string_arg(child) {
                        site.index_document = vars.interpolate(&index);
                    }
                }
                "error" => {
                    if let Some(error) = get_first_string_arg(child) {
                        site.error_document = vars.interpolate(&error);
                    }
                }
                "force-destroy" | "force_destroy" => {
                    site.force_destroy = get_bool_arg(child, "site force-destroy")?;
                }
                _ => {}
            }
        }
    }
    Ok(site)
}

fn parse_distribution(node: &KdlNode, vars: &VariableContext) -> ConfigResult<DistributionSpec> {
    let mut distribution = DistributionSpec::default();
    if let Some(name) = get_first_string_arg(node) {
        distribution.name = name;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "root-object" | "root_object" => {
                    if let Some(root) = get_first_string_arg(child) {
                        distribution.default_root_object = vars.interpolate(&root);
                    }
                }
                "spa-fallback" | "spa_fallback" => {
                    distribution.spa_fallback = get_bool_arg(child, "distribution spa-fallback")?;
                }
                _ => {}
            }
        }
    }
    Ok(distribution)
}

fn parse_domain(node: &KdlNode, vars: &VariableContext) -> ConfigResult<DomainBinding> {
    let domain_name = get_first_string_arg(node)
        .map(|s| vars.interpolate(&s))
        .ok_or_else(|| ConfigError::MissingField("domain name".to_string()))?;
    let certificate = get_string_prop(node, "certificate")
        .map(|s| vars.interpolate(&s))
        .ok_or_else(|| ConfigError::MissingField("domain certificate".to_string()))?;
    let hosted_zone = get_string_prop(node, "hosted-zone")
        .map(|s| vars.interpolate(&s))
        .ok_or_else(|| ConfigError::MissingField("domain hosted-zone".to_string()))?;

    let mut domain = DomainBinding::new(domain_name, certificate, hosted_zone);
    domain.zone_name = get_string_prop(node, "zone-name").map(|s| vars.interpolate(&s));
    Ok(domain)
}

/// Interpolate an optional setting; an empty or unresolved result disables it.
fn optional_setting(field: &str, raw: &str, vars: &VariableContext) -> Option<String> {
    let value = vars.interpolate(raw);
    let unresolved = vars.unresolved_in(raw);
    if !unresolved.is_empty() {
        warn!(setting = %field, references = ?unresolved, "Setting references unset variables, skipping");
        return None;
    }
    if value.trim().is_empty() {
        warn!(setting = %field, "Setting is empty, skipping");
        return None;
    }
    Some(value)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u32_arg(node: &KdlNode, field: &str) -> ConfigResult<u32> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?
        .value();
    value
        .as_integer()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| ConfigError::invalid(field, format!("expected a positive integer, found {value}")))
}

fn get_bool_arg(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?
        .value();
    value
        .as_bool()
        .ok_or_else(|| ConfigError::invalid(field, format!("expected #true or #false, found {value}")))
}
