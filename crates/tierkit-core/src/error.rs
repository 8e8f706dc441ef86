//! Error types for topology assembly.
//!
//! Every variant is fatal for the assembly pass that raised it. They describe
//! configuration or programming defects, so nothing here is retried.

use thiserror::Error;

use crate::phase::Phase;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error on '{node}': {message}")]
    Configuration { node: String, message: String },

    #[error("cyclic dependency introduced by edge '{}' -> '{}': {}", .edge.0, .edge.1, .cycle.join(" -> "))]
    CyclicDependency {
        /// The edge (dependent, dependency) that closed the cycle.
        edge: (String, String),
        /// Nodes on the cycle, starting and ending at the dependent.
        cycle: Vec<String>,
    },

    #[error("unresolved reference {producer}.{attribute}: {reason}")]
    UnresolvedReference {
        producer: String,
        attribute: String,
        reason: String,
    },

    #[error("cannot {action} in phase {current}: requires {required}")]
    PhaseOrdering {
        current: Phase,
        required: Phase,
        action: String,
    },
}

impl Error {
    pub(crate) fn configuration(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            node: node.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unresolved(
        producer: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvedReference {
            producer: producer.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
