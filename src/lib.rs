// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # twinflow
//!
//! Coverage-driven model resolution for digital-twin observations: given an
//! observable and a context scale, find the models that can compute it,
//! compile them into an executable dataflow, and record the results with
//! their provenance in a knowledge graph.
//!
//! ## Architecture
//!
//! - **Coverage algebra** (`scale`, `coverage`): region arithmetic over
//!   axis-aligned spatiotemporal boxes
//! - **Candidate index** (`catalog`): ranked model lookup through the
//!   resources and reasoner contracts
//! - **Resolution** (`resolution`): bounded depth-first search with cycle
//!   detection and rollback
//! - **Dataflows** (`dataflow`): compilation, merge into a context, and
//!   canonical text encoding
//! - **Runtime** (`runtime`): execution into a petgraph-backed digital twin
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use twinflow::catalog::{InMemoryCatalog, TaxonomyReasoner};
//! use twinflow::config::ResolverConfig;
//! use twinflow::engine::ResolverService;
//! use twinflow::model::{Contextualizable, Model};
//! use twinflow::runtime::DigitalTwin;
//! use twinflow::scale::Scale;
//! use twinflow::scope::ContextScope;
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let elevation = "geography:Elevation".parse().unwrap();
//! catalog
//!     .insert(Model::new("im.dem", elevation).computing(Contextualizable::literal(120.0)))
//!     .unwrap();
//! let service = ResolverService::new(
//!     ResolverConfig::default(),
//!     catalog,
//!     Arc::new(TaxonomyReasoner::new()),
//!     Arc::new(DigitalTwin::new()),
//! )
//! .unwrap();
//! let scope = ContextScope::new("region", Scale::space(0.0, 1.0, 0.0, 1.0).unwrap());
//! let observation = service
//!     .observe(&"geography:Elevation".parse().unwrap(), &scope)
//!     .unwrap()
//!     .wait()
//!     .unwrap();
//! ```

pub mod catalog;
pub mod config;
pub mod coverage;
pub mod dataflow;
pub mod engine;
pub mod error;
pub mod id;
pub mod model;
pub mod notification;
pub mod observable;
pub mod request;
pub mod resolution;
pub mod runtime;
pub mod scale;
pub mod scope;
pub mod value;
