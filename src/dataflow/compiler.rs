//! Lowering of resolutions to dataflows.
//!
//! The compiler walks the resolution DAG pre-order with an explicit stack,
//! giving every visit a fresh actuator id. A node visited a second time (a
//! shared dependency) becomes a `reference` actuator pointing at the first
//! visit. Actuators are then assembled bottom-up, children in dependency
//! declaration order.

use std::collections::{BTreeSet, HashMap};

use crate::coverage::Coverage;
use crate::error::{DataflowError, DataflowResult};
use crate::id::{ActuatorId, IdAllocator};
use crate::model::CoreFunctor;
use crate::resolution::{NodeId, NodeModel, Resolution, ResolutionNode};
use crate::value::Parameters;

use super::{Actuator, ActuatorKind, Dataflow};

pub struct DataflowCompiler<'a> {
    allocator: &'a dyn IdAllocator,
    /// Deepest nesting a compiled plan may have; unbounded when `None`.
    max_depth: Option<usize>,
}

struct Slot {
    node: NodeId,
    id: ActuatorId,
    parent: Option<usize>,
    depth: usize,
    reference: Option<ActuatorId>,
}

impl<'a> DataflowCompiler<'a> {
    pub fn new(allocator: &'a dyn IdAllocator) -> Self {
        Self {
            allocator,
            max_depth: None,
        }
    }

    /// Refuse plans nested deeper than `max_depth` below their roots.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn compile(&self, resolution: &Resolution) -> DataflowResult<Dataflow> {
        let mut dataflow = Dataflow::empty(resolution.scale.clone());
        dataflow.observable = Some(resolution.observable.clone());
        dataflow.notifications = resolution.notifications.clone();
        if resolution.is_empty() {
            return Ok(dataflow);
        }

        let slots = self.plan(resolution)?;

        let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
        for (i, slot) in slots.iter().enumerate() {
            if let Some(p) = slot.parent {
                children_of[p].push(i);
            }
        }

        let mut built: Vec<Option<Actuator>> = Vec::with_capacity(slots.len());
        let mut requirements = BTreeSet::new();
        for slot in &slots {
            let Some(node) = resolution.node(slot.node) else {
                built.push(None);
                continue;
            };
            if slot.reference.is_none() {
                if let NodeModel::Model(model) = &node.model {
                    requirements.extend(model.requirements());
                }
            }
            built.push(Some(lower(node, slot)));
        }

        // Children always come after their parent in pre-order, so assembling
        // in reverse finishes every child before its parent needs it.
        for i in (0..slots.len()).rev() {
            let children: Vec<Actuator> = children_of[i]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            if let Some(actuator) = built[i].as_mut() {
                actuator.children = children;
            }
        }

        dataflow.actuators = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent.is_none())
            .filter_map(|(i, _)| built[i].take())
            .collect();
        dataflow.target = dataflow.actuators.first().map(|a| a.id);
        dataflow.requirements = requirements;
        dataflow.recompute_coverage();

        tracing::debug!(
            observable = %resolution.observable,
            actuators = slots.len(),
            coverage = dataflow.coverage.fraction(),
            "dataflow compiled"
        );
        Ok(dataflow)
    }

    /// Pre-order visit order with ids assigned.
    fn plan(&self, resolution: &Resolution) -> DataflowResult<Vec<Slot>> {
        let mut slots: Vec<Slot> = Vec::with_capacity(resolution.len());
        let mut first_visit: HashMap<NodeId, ActuatorId> = HashMap::new();
        let mut stack: Vec<(NodeId, Option<usize>)> =
            resolution.roots.iter().rev().map(|&n| (n, None)).collect();

        while let Some((node, parent)) = stack.pop() {
            let depth = parent.map_or(0, |p| slots[p].depth + 1);
            if let Some(max_depth) = self.max_depth.filter(|&m| depth > m) {
                return Err(DataflowError::DepthExceeded { max_depth });
            }
            let id = self.allocator.next_id()?;
            let index = slots.len();
            match first_visit.get(&node) {
                Some(&original) => slots.push(Slot {
                    node,
                    id,
                    parent,
                    depth,
                    reference: Some(original),
                }),
                None => {
                    first_visit.insert(node, id);
                    slots.push(Slot {
                        node,
                        id,
                        parent,
                        depth,
                        reference: None,
                    });
                    if let Some(n) = resolution.node(node) {
                        let children: Vec<NodeId> = n.children().collect();
                        stack.extend(children.into_iter().rev().map(|c| (c, Some(index))));
                    }
                }
            }
        }
        Ok(slots)
    }
}

fn lower(node: &ResolutionNode, slot: &Slot) -> Actuator {
    let mut actuator = Actuator {
        id: slot.id,
        observable: node.observable.clone(),
        kind: ActuatorKind::Observe,
        scale: node.scale.clone(),
        strategy: None,
        computation: Vec::new(),
        children: Vec::new(),
        coverage: node.coverage.clone(),
        parameters: Parameters::new(),
        reference: None,
    };

    if let Some(original) = slot.reference {
        actuator.kind = ActuatorKind::Reference;
        actuator.reference = Some(original);
        return actuator;
    }

    match &node.model {
        NodeModel::Model(model) => {
            actuator.strategy = Some(model.urn.clone());
            actuator.computation = model.service_calls();
            actuator
                .parameters
                .insert("version", model.version.to_string());
        }
        NodeModel::Deferred => {
            actuator.kind = ActuatorKind::Resolve;
            actuator.computation = vec![
                CoreFunctor::Deferred
                    .call()
                    .with("observable", node.observable.urn()),
            ];
        }
        NodeModel::Constant(value) => {
            actuator.computation = vec![
                CoreFunctor::ConstantResolver
                    .call()
                    .with("value", value.clone()),
            ];
        }
        NodeModel::Unresolved => {
            actuator.kind = ActuatorKind::Resolve;
            actuator.coverage = Coverage::empty(node.scale.clone());
        }
    }
    actuator
}
