//! Execution of compiled dataflows into a digital twin.
//!
//! - [`twin`]: the [`KnowledgeGraph`] contract and its petgraph-backed
//!   [`DigitalTwin`] implementation
//! - [`registry`]: the contextualizers service calls are dispatched to
//! - [`executor`]: walks a dataflow on a worker thread behind an [`ExecutionHandle`]

pub mod executor;
pub mod registry;
pub mod twin;

pub use executor::{ExecutionHandle, Executor};
pub use registry::{ComponentRegistry, Contextualizer, StepInput};
pub use twin::{
    Activity, ActivityKind, Agent, DigitalTwin, KnowledgeGraph, NodeKey, Observation, Outcome,
    Relationship, TwinNode, TwinSnapshot,
};
