//! Deallocation order for a synthesized topology.
//!
//! The plan is the mirror of construction: dependents go before the
//! resources they depend on. It is only described here; applying it is left
//! to deploy tooling.

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::resource::{DeletionPolicy, ResourceKind};
use crate::topology::Topology;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TeardownStep {
    /// Purge stored objects so the bucket can be deleted.
    EmptyBucket {
        logical_id: String,
        bucket_name: String,
    },
    Delete {
        logical_id: String,
        resource_type: String,
    },
    /// Left in place: imports and retained resources.
    Retain {
        logical_id: String,
        resource_type: String,
    },
}

impl TeardownStep {
    pub fn logical_id(&self) -> &str {
        match self {
            TeardownStep::EmptyBucket { logical_id, .. }
            | TeardownStep::Delete { logical_id, .. }
            | TeardownStep::Retain { logical_id, .. } => logical_id,
        }
    }
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownStep::EmptyBucket {
                logical_id,
                bucket_name,
            } => write!(f, "empty   {logical_id} ({bucket_name})"),
            TeardownStep::Delete {
                logical_id,
                resource_type,
            } => write!(f, "delete  {logical_id} [{resource_type}]"),
            TeardownStep::Retain {
                logical_id,
                resource_type,
            } => write!(f, "retain  {logical_id} [{resource_type}]"),
        }
    }
}

/// Steps to tear `topology` down, in reverse construction order.
pub fn teardown_plan(topology: &Topology) -> Result<Vec<TeardownStep>> {
    if topology.phase() != Phase::Finalized {
        return Err(Error::PhaseOrdering {
            current: topology.phase(),
            required: Phase::Finalized,
            action: "plan teardown".to_string(),
        });
    }

    let mut steps = Vec::new();
    for resource in topology.resources().iter().rev() {
        let logical_id = resource.name.clone();
        let resource_type = resource.kind.type_name().to_string();

        if resource.kind.is_import() || resource.deletion_policy == DeletionPolicy::Retain {
            steps.push(TeardownStep::Retain {
                logical_id,
                resource_type,
            });
            continue;
        }

        if resource.kind == ResourceKind::Bucket
            && resource.deletion_policy == DeletionPolicy::ForceDelete
        {
            let bucket_name = resource.attribute("BucketName").ok_or_else(|| {
                Error::unresolved(&resource.name, "BucketName", "bucket has no published name")
            })?;
            steps.push(TeardownStep::EmptyBucket {
                logical_id: logical_id.clone(),
                bucket_name: bucket_name.to_string(),
            });
        }
        steps.push(TeardownStep::Delete {
            logical_id,
            resource_type,
        });
    }
    Ok(steps)
}
