//! Context scopes and resolution constraints.
//!
//! A [`ContextScope`] tells the resolver where it is working: the scale, the
//! observation new dataflows hook onto, and an open set of named
//! [`ResolutionConstraints`]. Constraint names the core does not understand
//! are carried along untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, ResolutionResult};
use crate::id::ActuatorId;
use crate::model::Version;
use crate::scale::{Dimension, Extent, Scale};
use crate::value::Value;

/// Well-known constraint names.
pub mod constraint {
    /// `true` to accept partial coverage without treating it as a failure.
    pub const ACCEPT_PARTIAL: &str = "accept-partial";
    /// Model URNs that must not be used.
    pub const EXCLUDE_MODEL: &str = "exclude-model";
    /// Namespaces whose models rank first.
    pub const RESOLUTION_NAMESPACE: &str = "resolution-namespace";
    /// Projects whose models rank first.
    pub const RESOLUTION_PROJECT: &str = "resolution-project";
    /// Version pins written `urn=version`.
    pub const MODEL_VERSION: &str = "model-version";
    /// Agent recorded as responsible for the resulting activities.
    pub const PROVENANCE: &str = "provenance";
    /// Geometry override for the request: one `[dimension, start, end]`
    /// list per extent.
    pub const GEOMETRY: &str = "geometry";

    /// Constraints holding a single setting; a later value replaces an
    /// earlier one instead of joining it.
    pub const SINGLE_VALUED: [&str; 3] = [ACCEPT_PARTIAL, PROVENANCE, GEOMETRY];
}

/// One named constraint with its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConstraint {
    pub name: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl ResolutionConstraint {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn accept_partial(accept: bool) -> Self {
        Self::new(constraint::ACCEPT_PARTIAL, vec![Value::Bool(accept)])
    }

    pub fn exclude_model(urn: impl Into<String>) -> Self {
        Self::new(constraint::EXCLUDE_MODEL, vec![Value::Text(urn.into())])
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self::new(constraint::RESOLUTION_NAMESPACE, vec![Value::Text(namespace.into())])
    }

    pub fn project(project: impl Into<String>) -> Self {
        Self::new(constraint::RESOLUTION_PROJECT, vec![Value::Text(project.into())])
    }

    pub fn model_version(urn: &str, version: Version) -> Self {
        Self::new(constraint::MODEL_VERSION, vec![Value::Text(format!("{urn}={version}"))])
    }

    pub fn provenance(agent: impl Into<String>) -> Self {
        Self::new(constraint::PROVENANCE, vec![Value::Text(agent.into())])
    }

    /// Resolve over `scale` instead of the context's own scale.
    pub fn geometry(scale: &Scale) -> Self {
        let extents = scale
            .extents()
            .iter()
            .map(|e| {
                Value::List(vec![
                    Value::Text(e.dimension.to_string()),
                    Value::Float(e.start),
                    Value::Float(e.end),
                ])
            })
            .collect();
        Self::new(constraint::GEOMETRY, extents)
    }
}

/// Open set of constraints. Adding a constraint whose name is already present
/// appends its values, except for the single-valued ones, which are replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionConstraints(Vec<ResolutionConstraint>);

impl ResolutionConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: ResolutionConstraint) {
        match self.0.iter_mut().find(|c| c.name == constraint.name) {
            Some(existing) if constraint::SINGLE_VALUED.contains(&constraint.name.as_str()) => {
                existing.values = constraint.values;
            }
            Some(existing) => {
                for v in constraint.values {
                    if !existing.values.contains(&v) {
                        existing.values.push(v);
                    }
                }
            }
            None => self.0.push(constraint),
        }
    }

    pub fn with(mut self, constraint: ResolutionConstraint) -> Self {
        self.add(constraint);
        self
    }

    /// Constraints of `other` layered over these.
    pub fn merged(&self, other: &ResolutionConstraints) -> ResolutionConstraints {
        let mut merged = self.clone();
        for c in &other.0 {
            merged.add(c.clone());
        }
        merged
    }

    pub fn get(&self, name: &str) -> Option<&ResolutionConstraint> {
        self.0.iter().find(|c| c.name == name)
    }

    pub fn values(&self, name: &str) -> &[Value] {
        self.get(name)
            .map(|c| c.values.as_slice())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionConstraint> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn texts(&self, name: &str) -> impl Iterator<Item = &str> {
        self.values(name).iter().filter_map(Value::as_str)
    }

    /// `None` when the request does not say, so the configured default applies.
    pub fn accept_partial(&self) -> Option<bool> {
        self.values(constraint::ACCEPT_PARTIAL)
            .iter()
            .rev()
            .find_map(Value::as_bool)
    }

    pub fn excluded_models(&self) -> BTreeSet<&str> {
        self.texts(constraint::EXCLUDE_MODEL).collect()
    }

    pub fn preferred_namespaces(&self) -> Vec<&str> {
        self.texts(constraint::RESOLUTION_NAMESPACE).collect()
    }

    pub fn preferred_projects(&self) -> Vec<&str> {
        self.texts(constraint::RESOLUTION_PROJECT).collect()
    }

    /// The version pinned for `urn`, if any. Malformed pins are returned as
    /// raw text so the caller can report them.
    pub fn pinned_version(&self, urn: &str) -> Option<&str> {
        self.texts(constraint::MODEL_VERSION)
            .filter_map(|pin| pin.split_once('='))
            .find(|(u, _)| u.trim() == urn)
            .map(|(_, v)| v.trim())
    }

    pub fn provenance_agent(&self) -> Option<&str> {
        self.texts(constraint::PROVENANCE).next()
    }

    /// The scale requested through the geometry constraint, if any.
    pub fn geometry(&self) -> ResolutionResult<Option<Scale>> {
        let values = self.values(constraint::GEOMETRY);
        if values.is_empty() {
            return Ok(None);
        }
        let invalid = |message: String| ResolutionError::InvalidRequest { message };
        let mut extents = Vec::with_capacity(values.len());
        for value in values {
            let Value::List(parts) = value else {
                return Err(invalid(format!("geometry extent {value} is not a list")));
            };
            let [dimension, start, end] = parts.as_slice() else {
                return Err(invalid(format!("geometry extent {value} needs dimension, start and end")));
            };
            let dimension = match dimension.as_str() {
                Some("x") => Dimension::X,
                Some("y") => Dimension::Y,
                Some("time") => Dimension::Time,
                _ => return Err(invalid(format!("unknown geometry dimension {dimension}"))),
            };
            let (Some(start), Some(end)) = (start.as_f64(), end.as_f64()) else {
                return Err(invalid(format!("geometry extent {value} has non-numeric bounds")));
            };
            extents.push(Extent::new(dimension, start, end).map_err(|e| invalid(e.to_string()))?);
        }
        Scale::new(extents)
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    }
}

impl FromIterator<ResolutionConstraint> for ResolutionConstraints {
    fn from_iter<I: IntoIterator<Item = ResolutionConstraint>>(iter: I) -> Self {
        let mut set = ResolutionConstraints::new();
        for c in iter {
            set.add(c);
        }
        set
    }
}

/// Where a resolution happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextScope {
    /// Identifies the context; one dataflow is kept per id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scale: Scale,
    /// Hook point for merging: the observation new dataflows attach under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_observation: Option<ActuatorId>,
    #[serde(default, skip_serializing_if = "ResolutionConstraints::is_empty")]
    pub constraints: ResolutionConstraints,
}

impl ContextScope {
    pub fn new(id: impl Into<String>, scale: Scale) -> Self {
        Self {
            id: id.into(),
            name: None,
            scale,
            current_observation: None,
            constraints: ResolutionConstraints::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A copy of this scope with `constraints` layered on top.
    pub fn with_resolution_constraints(&self, constraints: &ResolutionConstraints) -> Self {
        let mut scope = self.clone();
        scope.constraints = self.constraints.merged(constraints);
        scope
    }

    /// A copy of this scope focused on `observation` as the hook point.
    pub fn within(&self, observation: ActuatorId) -> Self {
        let mut scope = self.clone();
        scope.current_observation = Some(observation);
        scope
    }

    pub fn at_scale(&self, scale: Scale) -> Self {
        let mut scope = self.clone();
        scope.scale = scale;
        scope
    }

    /// Name used to label encoded dataflows.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
