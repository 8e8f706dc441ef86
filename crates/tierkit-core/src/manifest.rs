//! Synthesized deployment manifest.
//!
//! The manifest is what external deploy tooling consumes: every resource in
//! construction order with its fully resolved properties, plus the rendered
//! outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AssemblyId;
use crate::intent::StackSettings;
use crate::output::RenderedOutputs;
use crate::phase::Phase;
use crate::resource::DeletionPolicy;
use crate::topology::Topology;
use crate::{Error, Result};

pub const FORMAT_VERSION: &str = "2024-01-01";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    pub stack: StackSettings,
    pub assembly_id: AssemblyId,
    pub synthesized_at: DateTime<Utc>,
    pub resources: Vec<ManifestResource>,
    pub outputs: RenderedOutputs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestResource {
    pub logical_id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub properties: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Omitted for the default policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Manifest {
    /// Snapshot a finalized topology.
    pub fn from_topology(topology: &Topology, synthesized_at: DateTime<Utc>) -> Result<Self> {
        if topology.phase() != Phase::Finalized {
            return Err(Error::PhaseOrdering {
                current: topology.phase(),
                required: Phase::Finalized,
                action: "synthesize a manifest".to_string(),
            });
        }

        let resources = topology
            .resources()
            .iter()
            .map(|r| ManifestResource {
                logical_id: r.name.clone(),
                resource_type: r.kind.type_name().to_string(),
                properties: r.properties.clone(),
                depends_on: r.depends_on.clone(),
                deletion_policy: match r.deletion_policy {
                    DeletionPolicy::Delete => None,
                    other => Some(other),
                },
            })
            .collect();

        Ok(Self {
            format_version: FORMAT_VERSION.to_string(),
            stack: topology.stack().clone(),
            assembly_id: topology.assembly_id(),
            synthesized_at,
            resources,
            outputs: topology.render()?,
        })
    }

    pub fn resource(&self, logical_id: &str) -> Option<&ManifestResource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ComputeSpec, TopologyIntent};
    use crate::topology::{assemble_with, Topology};

    fn finalized() -> Topology {
        let intent = TopologyIntent::new(StackSettings::new("app"), ComputeSpec::new("svc", "h"));
        assemble_with(&intent, "0190a5c4-6f2e-7a00-8000-000000000002".parse().unwrap()).unwrap()
    }

    #[test]
    fn test_manifest_requires_finalized_topology() {
        let topology = Topology::new(StackSettings::new("app"), None).unwrap();
        let err = Manifest::from_topology(&topology, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::PhaseOrdering {
                required: Phase::Finalized,
                ..
            }
        ));
    }

    #[test]
    fn test_manifest_lists_resources_in_construction_order() {
        let topology = finalized();
        let manifest = Manifest::from_topology(&topology, Utc::now()).unwrap();

        let ids: Vec<&str> = manifest.resources.iter().map(|r| r.logical_id.as_str()).collect();
        let expected: Vec<&str> = topology.resources().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(manifest.outputs.len(), 4);

        let bucket = manifest.resource("WebsiteBucket").unwrap();
        assert_eq!(bucket.resource_type, "AWS::S3::Bucket");
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::ForceDelete));
        assert_eq!(manifest.resource("Function").unwrap().deletion_policy, None);
    }

    #[test]
    fn test_manifest_json_shape() {
        let topology = finalized();
        let synthesized_at = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let manifest = Manifest::from_topology(&topology, synthesized_at).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&manifest.to_json_pretty().unwrap()).unwrap();

        assert_eq!(json["format_version"], FORMAT_VERSION);
        assert_eq!(json["stack"]["name"], "app");
        assert_eq!(json["assembly_id"], "0190a5c4-6f2e-7a00-8000-000000000002");
        assert_eq!(json["resources"][0]["type"], "AWS::Lambda::Function");
        assert!(json["resources"][0].get("depends_on").is_none());
        assert_eq!(json["outputs"][0]["name"], "ApiUrl");

        // Deferred values never leak into the manifest.
        assert!(!manifest.to_json_pretty().unwrap().contains("${"));
    }
}
