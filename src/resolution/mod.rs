//! Resolution graphs.
//!
//! A [`Resolution`] is the accepted DAG of [`ResolutionNode`]s for one
//! requested observable. Nodes live in an arena and refer to each other by
//! [`NodeId`]; a node reached from two parents (the same observable at the same
//! scale needed twice) is stored once and shared.

mod builder;

pub use builder::ResolutionBuilder;

use std::sync::Arc;

use crate::coverage::Coverage;
use crate::model::Model;
use crate::notification::Notification;
use crate::observable::Observable;
use crate::scale::Scale;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// What satisfies a node.
#[derive(Debug, Clone)]
pub enum NodeModel {
    Model(Arc<Model>),
    /// Left for the runtime to resolve when the plan executes.
    Deferred,
    /// Default value of an observable nothing could produce.
    Constant(Value),
    /// An optional input that was looked for and not found.
    Unresolved,
}

impl NodeModel {
    pub fn model(&self) -> Option<&Arc<Model>> {
        match self {
            NodeModel::Model(m) => Some(m),
            _ => None,
        }
    }
}

/// The nodes that together satisfy one declared dependency, in acceptance order.
#[derive(Debug, Clone)]
pub struct DependencyLink {
    pub observable: Observable,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ResolutionNode {
    pub id: NodeId,
    pub observable: Observable,
    pub scale: Scale,
    pub model: NodeModel,
    pub coverage: Coverage,
    /// In the model's dependency declaration order.
    pub dependencies: Vec<DependencyLink>,
}

impl ResolutionNode {
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies.iter().flat_map(|d| d.nodes.iter().copied())
    }
}

/// How a single search branch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Resolved,
    Partial,
    Unresolved,
    Cycle,
    DepthExceeded,
    TimedOut,
}

/// The accepted composition for one observable.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub observable: Observable,
    pub scale: Scale,
    nodes: Vec<ResolutionNode>,
    /// Nodes satisfying the requested observable, in acceptance order.
    pub roots: Vec<NodeId>,
    pub coverage: Coverage,
    pub outcome: BranchOutcome,
    pub notifications: Vec<Notification>,
    tolerance: f64,
}

impl Resolution {
    /// A resolution that accepted nothing.
    pub fn empty(observable: Observable, scale: Scale) -> Self {
        Self {
            observable,
            coverage: Coverage::empty(scale.clone()),
            scale,
            nodes: Vec::new(),
            roots: Vec::new(),
            outcome: BranchOutcome::Unresolved,
            notifications: Vec::new(),
            tolerance: 0.0,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&ResolutionNode> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[ResolutionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.is_empty() && self.coverage.is_complete(self.tolerance)
    }

    /// What is still uncovered.
    pub fn uncovered(&self) -> Coverage {
        self.coverage.uncovered()
    }

    /// URNs of all models used, in arena order.
    pub fn models(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| n.model.model().map(|m| m.urn.as_str()))
            .collect()
    }
}
