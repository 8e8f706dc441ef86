//! Core types and the resource-dependency graph builder for tierkit.
//!
//! This crate contains:
//! - Resource descriptors and the kind catalog
//! - Deferred values and the attribute table that resolves them
//! - The dependency graph and its deterministic construction order
//! - Least-privilege policy binding
//! - The phased topology assembler
//! - Outputs, the synthesized manifest and the teardown plan

pub mod catalog;
pub mod error;
pub mod graph;
pub mod id;
pub mod intent;
pub mod manifest;
pub mod output;
pub mod phase;
pub mod policy;
pub mod reference;
pub mod resource;
pub mod teardown;
pub mod topology;

pub use error::{Error, Result};
pub use id::AssemblyId;
pub use intent::TopologyIntent;
pub use manifest::Manifest;
pub use phase::Phase;
pub use reference::{DeferredValue, PropertyValue, defer};
pub use teardown::{TeardownStep, teardown_plan};
pub use topology::{Topology, assemble, assemble_with};
