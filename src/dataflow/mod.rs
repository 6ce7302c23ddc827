//! Dataflows: compiled, executable plans.
//!
//! A [`Dataflow`] is a forest of [`Actuator`]s. Each actuator computes one
//! observation, owns the actuators of its dependencies as children, and
//! carries the ordered service calls that produce its value. Actuator ids
//! double as observation ids, which is what [`merge::add`] hooks onto.

pub mod compiler;
pub mod encoder;
pub mod merge;

pub use compiler::DataflowCompiler;
pub use encoder::DataflowEncoder;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::coverage::Coverage;
use crate::id::ActuatorId;
use crate::model::ServiceCall;
use crate::notification::Notification;
use crate::observable::Observable;
use crate::scale::Scale;
use crate::value::Parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Computes its observable with its own service calls.
    Observe,
    /// Placeholder resolved when the plan runs.
    Resolve,
    /// Reuses the result of another actuator in the same dataflow.
    Reference,
}

impl ActuatorKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ActuatorKind::Observe => "observe",
            ActuatorKind::Resolve => "resolve",
            ActuatorKind::Reference => "reference",
        }
    }
}

impl std::fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    pub id: ActuatorId,
    pub observable: Observable,
    pub kind: ActuatorKind,
    pub scale: Scale,
    /// URN of the model chosen to compute this actuator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub computation: Vec<ServiceCall>,
    /// Dependency actuators, in declaration order.
    #[serde(default)]
    pub children: Vec<Actuator>,
    pub coverage: Coverage,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    /// For [`ActuatorKind::Reference`]: the actuator whose result is reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ActuatorId>,
}

impl Actuator {
    /// Identifier printed in encoded dataflows.
    pub fn target_name(&self) -> String {
        match self.kind {
            ActuatorKind::Resolve => format!("obs{}", self.id.get()),
            _ => self.observable.urn(),
        }
    }

    /// Pre-order walk over this actuator and all its descendants.
    pub fn walk(&self) -> Vec<&Actuator> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(a) = stack.pop() {
            out.push(a);
            stack.extend(a.children.iter().rev());
        }
        out
    }
}

/// The compiled plan for one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataflow {
    /// Root actuators, in the order they were added.
    pub actuators: Vec<Actuator>,
    /// Union of the roots' coverage.
    pub coverage: Coverage,
    /// Resource URNs the plan needs at run time.
    #[serde(default)]
    pub requirements: BTreeSet<String>,
    /// Observation this dataflow was compiled to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActuatorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observable: Option<Observable>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl Dataflow {
    /// A plan that does nothing. Legal, and the answer to requests that found
    /// nothing usable.
    pub fn empty(scale: Scale) -> Self {
        Self {
            actuators: Vec::new(),
            coverage: Coverage::empty(scale),
            requirements: BTreeSet::new(),
            target: None,
            observable: None,
            notifications: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    /// All actuators, pre-order, roots in order.
    pub fn walk(&self) -> Vec<&Actuator> {
        self.actuators.iter().flat_map(Actuator::walk).collect()
    }

    pub fn find(&self, id: ActuatorId) -> Option<&Actuator> {
        self.walk().into_iter().find(|a| a.id == id)
    }

    pub fn ids(&self) -> Vec<ActuatorId> {
        self.walk().into_iter().map(|a| a.id).collect()
    }

    pub fn actuator_count(&self) -> usize {
        self.walk().len()
    }

    /// Recompute the aggregate coverage from the roots.
    pub fn recompute_coverage(&mut self) {
        let scale = self.coverage.scale().clone();
        self.coverage = self
            .actuators
            .iter()
            .fold(Coverage::empty(scale), |acc, a| acc.merge(&a.coverage));
    }
}
