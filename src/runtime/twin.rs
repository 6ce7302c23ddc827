//! The digital twin: a provenance graph of observations, activities, and agents.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for O(1) lookups by
//! [`NodeKey`]. Executing a dataflow only ever writes to the twin through the
//! narrow [`KnowledgeGraph`] contract.

use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::coverage::Coverage;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::ActuatorId;
use crate::observable::Observable;
use crate::scale::Scale;
use crate::value::Value;

/// The result of computing one actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Same as the id of the actuator that produced it.
    pub id: ActuatorId,
    #[serde(with = "crate::observable::as_definition")]
    pub observable: Observable,
    pub scale: Scale,
    pub coverage: Coverage,
    pub value: Option<Value>,
    /// `false` when nothing could be computed for it.
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    /// Running a whole dataflow.
    Resolution,
    /// Computing one actuator.
    Contextualization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub kind: ActivityKind,
    pub description: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TwinNode {
    Observation(Observation),
    Activity(Activity),
    Agent(Agent),
}

impl TwinNode {
    pub fn key(&self) -> NodeKey {
        match self {
            TwinNode::Observation(o) => NodeKey::Observation(o.id),
            TwinNode::Activity(a) => NodeKey::Activity(a.id),
            TwinNode::Agent(a) => NodeKey::Agent(a.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Observation(ActuatorId),
    Activity(u64),
    Agent(String),
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Observation(id) => write!(f, "observation {id}"),
            NodeKey::Activity(id) => write!(f, "activity {id}"),
            NodeKey::Agent(name) => write!(f, "agent {name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    /// Activity → observation it produced.
    Generated,
    /// Activity → agent responsible for it.
    AssociatedWith,
    /// Observation → the observation it is a dependency of.
    ChildOf,
    /// Activity → observation it read.
    Used,
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Relationship::Generated => write!(f, "generated"),
            Relationship::AssociatedWith => write!(f, "associated-with"),
            Relationship::ChildOf => write!(f, "child-of"),
            Relationship::Used => write!(f, "used"),
        }
    }
}

/// What execution writes to. Implementations must be safe to share between
/// the caller and the execution thread.
pub trait KnowledgeGraph: Send + Sync {
    /// Start an activity on behalf of `agent` and return its id.
    fn begin_activity(&self, kind: ActivityKind, description: &str, agent: &str) -> ExecutionResult<u64>;

    fn finish_activity(&self, activity: u64, outcome: Outcome) -> ExecutionResult<()>;

    /// Insert or replace an observation.
    fn record_observation(&self, observation: Observation) -> ExecutionResult<()>;

    fn link(&self, from: &NodeKey, relationship: Relationship, to: &NodeKey) -> ExecutionResult<()>;

    fn observation(&self, id: ActuatorId) -> Option<Observation>;
}

/// Serializable form of a twin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinSnapshot {
    pub nodes: Vec<TwinNode>,
    pub edges: Vec<(NodeKey, Relationship, NodeKey)>,
}

/// In-memory knowledge graph backed by petgraph.
pub struct DigitalTwin {
    graph: RwLock<DiGraph<TwinNode, Relationship>>,
    index: DashMap<NodeKey, NodeIndex>,
    next_activity: AtomicU64,
}

impl DigitalTwin {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            index: DashMap::new(),
            next_activity: AtomicU64::new(1),
        }
    }

    /// Insert `node`, or replace the node with the same key.
    fn upsert(&self, node: TwinNode) -> NodeIndex {
        let key = node.key();
        let mut graph = self.graph.write().expect("twin lock poisoned");
        if let Some(idx) = self.index.get(&key).map(|i| *i.value()) {
            if let Some(slot) = graph.node_weight_mut(idx) {
                *slot = node;
            }
            return idx;
        }
        let idx = graph.add_node(node);
        self.index.insert(key, idx);
        idx
    }

    fn lookup(&self, key: &NodeKey) -> ExecutionResult<NodeIndex> {
        self.index
            .get(key)
            .map(|i| *i.value())
            .ok_or_else(|| ExecutionError::Twin {
                message: format!("{key} is not in the twin"),
            })
    }

    pub fn node(&self, key: &NodeKey) -> Option<TwinNode> {
        let idx = self.index.get(key).map(|i| *i.value())?;
        let graph = self.graph.read().expect("twin lock poisoned");
        graph.node_weight(idx).cloned()
    }

    pub fn activity(&self, id: u64) -> Option<Activity> {
        match self.node(&NodeKey::Activity(id))? {
            TwinNode::Activity(a) => Some(a),
            _ => None,
        }
    }

    /// Targets of outgoing `relationship` edges from `from`.
    pub fn related(&self, from: &NodeKey, relationship: Relationship) -> Vec<NodeKey> {
        self.neighbors(from, relationship, Direction::Outgoing)
    }

    /// Sources of incoming `relationship` edges into `to`.
    pub fn related_to(&self, to: &NodeKey, relationship: Relationship) -> Vec<NodeKey> {
        self.neighbors(to, relationship, Direction::Incoming)
    }

    fn neighbors(&self, key: &NodeKey, relationship: Relationship, direction: Direction) -> Vec<NodeKey> {
        let Some(idx) = self.index.get(key).map(|i| *i.value()) else {
            return Vec::new();
        };
        let graph = self.graph.read().expect("twin lock poisoned");
        let mut out: Vec<NodeKey> = graph
            .edges_directed(idx, direction)
            .filter(|e| *e.weight() == relationship)
            .filter_map(|e| {
                let other = if direction == Direction::Outgoing {
                    e.target()
                } else {
                    e.source()
                };
                graph.node_weight(other).map(TwinNode::key)
            })
            .collect();
        out.reverse();
        out
    }

    pub fn observations(&self) -> Vec<Observation> {
        let graph = self.graph.read().expect("twin lock poisoned");
        let mut out: Vec<Observation> = graph
            .node_weights()
            .filter_map(|n| match n {
                TwinNode::Observation(o) => Some(o.clone()),
                _ => None,
            })
            .collect();
        out.sort_by_key(|o| o.id);
        out
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().expect("twin lock poisoned").edge_count()
    }

    pub fn snapshot(&self) -> TwinSnapshot {
        let graph = self.graph.read().expect("twin lock poisoned");
        let nodes = graph.node_weights().cloned().collect();
        let edges = graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = graph.edge_endpoints(e)?;
                Some((
                    graph.node_weight(a)?.key(),
                    *graph.edge_weight(e)?,
                    graph.node_weight(b)?.key(),
                ))
            })
            .collect();
        TwinSnapshot { nodes, edges }
    }

    pub fn from_snapshot(snapshot: TwinSnapshot) -> ExecutionResult<Self> {
        let twin = Self::new();
        let mut max_activity = 0;
        for node in snapshot.nodes {
            if let TwinNode::Activity(a) = &node {
                max_activity = max_activity.max(a.id);
            }
            twin.upsert(node);
        }
        for (from, rel, to) in &snapshot.edges {
            twin.link(from, *rel, to)?;
        }
        twin.next_activity.store(max_activity + 1, Ordering::Relaxed);
        Ok(twin)
    }

    /// Highest observation id recorded, to resume id allocation after a restore.
    pub fn max_observation_id(&self) -> u64 {
        self.observations().last().map_or(0, |o| o.id.get())
    }

    pub fn save(&self, path: &Path) -> ExecutionResult<()> {
        let bytes = bincode::serialize(&self.snapshot()).map_err(|e| ExecutionError::Twin {
            message: format!("cannot encode twin: {e}"),
        })?;
        std::fs::write(path, bytes).map_err(|e| ExecutionError::Twin {
            message: format!("cannot write {}: {e}", path.display()),
        })?;
        tracing::info!(path = %path.display(), nodes = self.node_count(), "twin saved");
        Ok(())
    }

    pub fn load(path: &Path) -> ExecutionResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| ExecutionError::Twin {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let snapshot: TwinSnapshot = bincode::deserialize(&bytes).map_err(|e| ExecutionError::Twin {
            message: format!("cannot decode {}: {e}", path.display()),
        })?;
        Self::from_snapshot(snapshot)
    }

    pub fn to_json(&self) -> ExecutionResult<String> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|e| ExecutionError::Twin {
            message: format!("cannot export twin: {e}"),
        })
    }
}

impl Default for DigitalTwin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DigitalTwin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalTwin")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl KnowledgeGraph for DigitalTwin {
    fn begin_activity(&self, kind: ActivityKind, description: &str, agent: &str) -> ExecutionResult<u64> {
        let id = self.next_activity.fetch_add(1, Ordering::Relaxed);
        self.upsert(TwinNode::Activity(Activity {
            id,
            kind,
            description: description.to_string(),
            outcome: Outcome::Running,
        }));
        let agent_key = NodeKey::Agent(agent.to_string());
        if !self.index.contains_key(&agent_key) {
            self.upsert(TwinNode::Agent(Agent {
                name: agent.to_string(),
            }));
        }
        self.link(&NodeKey::Activity(id), Relationship::AssociatedWith, &agent_key)?;
        Ok(id)
    }

    fn finish_activity(&self, activity: u64, outcome: Outcome) -> ExecutionResult<()> {
        let idx = self.lookup(&NodeKey::Activity(activity))?;
        let mut graph = self.graph.write().expect("twin lock poisoned");
        match graph.node_weight_mut(idx) {
            Some(TwinNode::Activity(a)) => {
                a.outcome = outcome;
                Ok(())
            }
            _ => Err(ExecutionError::Twin {
                message: format!("activity {activity} is not in the twin"),
            }),
        }
    }

    fn record_observation(&self, observation: Observation) -> ExecutionResult<()> {
        self.upsert(TwinNode::Observation(observation));
        Ok(())
    }

    fn link(&self, from: &NodeKey, relationship: Relationship, to: &NodeKey) -> ExecutionResult<()> {
        let a = self.lookup(from)?;
        let b = self.lookup(to)?;
        let mut graph = self.graph.write().expect("twin lock poisoned");
        let exists = graph
            .edges_connecting(a, b)
            .any(|e| *e.weight() == relationship);
        if !exists {
            graph.add_edge(a, b, relationship);
        }
        Ok(())
    }

    fn observation(&self, id: ActuatorId) -> Option<Observation> {
        match self.node(&NodeKey::Observation(id))? {
            TwinNode::Observation(o) => Some(o),
            _ => None,
        }
    }
}
