//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use tierkit_config::{VariableContext, load_topology};
use tierkit_core::{AssemblyId, Manifest, Topology, assemble, assemble_with, teardown_plan as plan};
use tracing::info;

fn load_and_assemble(config: &Path, assembly_id: Option<AssemblyId>) -> Result<Topology> {
    let vars = VariableContext::from_process_env();
    let intent = load_topology(config, &vars)
        .with_context(|| format!("failed to load {}", config.display()))?;
    info!(stack = %intent.stack.name, config = %config.display(), "Loaded configuration");

    let topology = match assembly_id {
        Some(id) => assemble_with(&intent, id),
        None => assemble(&intent),
    }
    .with_context(|| format!("failed to assemble stack '{}'", intent.stack.name))?;
    Ok(topology)
}

fn parse_assembly_id(assembly_id: Option<&str>) -> Result<Option<AssemblyId>> {
    assembly_id
        .map(|id| id.parse::<AssemblyId>())
        .transpose()
        .context("invalid assembly id")
}

pub fn synth(config: &Path, out: Option<&Path>, assembly_id: Option<&str>) -> Result<()> {
    let topology = load_and_assemble(config, parse_assembly_id(assembly_id)?)?;
    let manifest = Manifest::from_topology(&topology, chrono::Utc::now())?;
    let json = manifest.to_json_pretty()?;

    match out {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                resources = manifest.resources.len(),
                assembly = %manifest.assembly_id,
                "Wrote manifest"
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn validate(config: &Path) -> Result<()> {
    let topology = load_and_assemble(config, None)?;
    println!(
        "Configuration is valid: {} resources in stack '{}'",
        topology.resources().len(),
        topology.stack().name
    );
    Ok(())
}

pub fn outputs(config: &Path, assembly_id: Option<&str>) -> Result<()> {
    let topology = load_and_assemble(config, parse_assembly_id(assembly_id)?)?;
    for output in topology.render()?.iter() {
        match &output.description {
            Some(description) => println!("{} = {}  # {}", output.name, output.value, description),
            None => println!("{} = {}", output.name, output.value),
        }
    }
    Ok(())
}

pub fn teardown_plan(config: &Path, assembly_id: Option<&str>) -> Result<()> {
    let topology = load_and_assemble(config, parse_assembly_id(assembly_id)?)?;
    for (idx, step) in plan(&topology)?.iter().enumerate() {
        println!("{:>3}. {}", idx + 1, step);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assembly_id() {
        assert!(parse_assembly_id(None).unwrap().is_none());
        let id = parse_assembly_id(Some("0190a5c4-6f2e-7a00-8000-000000000001")).unwrap();
        assert_eq!(
            id.map(|id| id.to_string()).as_deref(),
            Some("0190a5c4-6f2e-7a00-8000-000000000001")
        );
        assert!(parse_assembly_id(Some("not-an-id")).is_err());
    }
}
