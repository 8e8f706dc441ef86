//! KDL configuration parsing for tierkit.
//!
//! This crate handles parsing of:
//! - Topology definitions (tierkit.kdl)
//! - Variable interpolation

pub mod error;
pub mod topology;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use topology::{load_topology, parse_topology};
pub use variables::{StackContext, VariableContext, VariableContextBuilder};
