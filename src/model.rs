//! Models: named, versioned candidate computations.
//!
//! A [`Model`] declares what it produces, what it depends on, where it
//! applies, and an ordered list of [`Contextualizable`] steps. The compiler
//! lowers each step to a [`ServiceCall`] through the [`CoreFunctor`] table.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coverage::Coverage;
use crate::error::{CatalogError, CatalogResult};
use crate::observable::Observable;
use crate::scale::Scale;
use crate::value::{Parameters, Value};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Accepts `MAJOR`, `MAJOR.MINOR` or `MAJOR.MINOR.PATCH`.
impl FromStr for Version {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CatalogError::MalformedVersion {
            value: s.to_string(),
        };
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> CatalogResult<u32> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| malformed()),
                None if required => Err(malformed()),
                None => Ok(0),
            }
        };
        let version = Version::new(next(true)?, next(false)?, next(false)?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

impl TryFrom<String> for Version {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

// ---------------------------------------------------------------------------
// Service calls
// ---------------------------------------------------------------------------

/// Built-in functions every runtime provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreFunctor {
    UrnResolver,
    LutResolver,
    ExpressionResolver,
    ConstantResolver,
    /// Placeholder for an observable resolved later, at run time.
    Deferred,
}

impl CoreFunctor {
    pub const ALL: [CoreFunctor; 5] = [
        CoreFunctor::UrnResolver,
        CoreFunctor::LutResolver,
        CoreFunctor::ExpressionResolver,
        CoreFunctor::ConstantResolver,
        CoreFunctor::Deferred,
    ];

    pub fn service_call_name(self) -> &'static str {
        match self {
            CoreFunctor::UrnResolver => "core.urn.resolver",
            CoreFunctor::LutResolver => "core.lut.resolver",
            CoreFunctor::ExpressionResolver => "core.expression.resolver",
            CoreFunctor::ConstantResolver => "core.constant.resolver",
            CoreFunctor::Deferred => "core.deferred",
        }
    }

    pub fn from_call_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.service_call_name() == name)
    }

    pub fn call(self) -> ServiceCall {
        ServiceCall::new(self.service_call_name())
    }
}

/// One computation step: a named function with ordered, typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

impl ServiceCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn is_core(&self) -> bool {
        CoreFunctor::from_call_name(&self.name).is_some()
    }

    /// Canonical text form, `name(key = value, ...)`.
    pub fn encode(&self) -> String {
        format!("{}({})", self.name, self.parameters)
    }
}

impl fmt::Display for ServiceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// ---------------------------------------------------------------------------
// Contextualizables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextualizableKind {
    /// An explicit call to a registered component.
    Call { call: ServiceCall },
    /// Data taken from external resources.
    Resources { urns: Vec<String> },
    /// Values classified according to a vocabulary.
    AccordingTo { according_to: String },
    Classification { classification: String },
    LookupTable { lookup_table: String },
    Expression { expression: String },
    Literal { value: Value },
}

/// A declared computation step of a model, before lowering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contextualizable {
    #[serde(flatten)]
    pub kind: ContextualizableKind,
    /// Name of the observable this step writes to, when not the model's primary one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Contextualizable {
    pub fn new(kind: ContextualizableKind) -> Self {
        Self { kind, target: None }
    }

    pub fn call(call: ServiceCall) -> Self {
        Self::new(ContextualizableKind::Call { call })
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::new(ContextualizableKind::Literal {
            value: value.into(),
        })
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Self::new(ContextualizableKind::Expression {
            expression: expression.into(),
        })
    }

    pub fn resources<I, S>(urns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ContextualizableKind::Resources {
            urns: urns.into_iter().map(Into::into).collect(),
        })
    }

    pub fn targeting(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Lower to the service call the runtime executes.
    pub fn lower(&self) -> ServiceCall {
        let mut call = match &self.kind {
            ContextualizableKind::Call { call } => call.clone(),
            ContextualizableKind::Resources { urns } => CoreFunctor::UrnResolver.call().with(
                "urns",
                Value::List(urns.iter().cloned().map(Value::Text).collect()),
            ),
            ContextualizableKind::AccordingTo { according_to } => CoreFunctor::LutResolver
                .call()
                .with("accordingTo", according_to.as_str()),
            ContextualizableKind::Classification { classification } => CoreFunctor::LutResolver
                .call()
                .with("classification", classification.as_str()),
            ContextualizableKind::LookupTable { lookup_table } => CoreFunctor::LutResolver
                .call()
                .with("lookupTable", lookup_table.as_str()),
            ContextualizableKind::Expression { expression } => CoreFunctor::ExpressionResolver
                .call()
                .with("expression", expression.as_str()),
            ContextualizableKind::Literal { value } => {
                CoreFunctor::ConstantResolver.call().with("value", value.clone())
            }
        };
        if let Some(target) = &self.target {
            call.parameters.insert("_target", target.as_str());
        }
        call
    }

    /// External resources this step needs at run time.
    fn requirements(&self) -> Vec<String> {
        match &self.kind {
            ContextualizableKind::Call { call } if !call.is_core() => vec![call.name.clone()],
            ContextualizableKind::Resources { urns } => urns.clone(),
            ContextualizableKind::LookupTable { lookup_table } => vec![lookup_table.clone()],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dependencies and models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct Dependency {
    pub observable: Observable,
    /// Resolved at run time instead of during search.
    #[serde(default)]
    pub deferred: bool,
    /// Resolve over this sub-scale instead of the model's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
}

impl Dependency {
    pub fn new(observable: Observable) -> Self {
        Self {
            observable,
            deferred: false,
            scale: None,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn at_scale(mut self, scale: Scale) -> Self {
        self.scale = Some(scale);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Bare(Observable),
    Full {
        observable: Observable,
        #[serde(default)]
        deferred: bool,
        #[serde(default)]
        scale: Option<Scale>,
    },
}

impl From<DependencyRepr> for Dependency {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Bare(observable) => Dependency::new(observable),
            DependencyRepr::Full {
                observable,
                deferred,
                scale,
            } => Dependency {
                observable,
                deferred,
                scale,
            },
        }
    }
}

/// A candidate computation as published by the resources catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub urn: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub observables: Vec<Observable>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Where the model applies. Empty means everywhere.
    #[serde(default)]
    pub coverage: Vec<Scale>,
    #[serde(default)]
    pub computation: Vec<Contextualizable>,
    /// Higher ranks first.
    #[serde(default)]
    pub priority: i32,
}

impl Model {
    pub fn new(urn: impl Into<String>, produces: Observable) -> Self {
        let urn = urn.into();
        let namespace = urn
            .rsplit_once('.')
            .map_or_else(String::new, |(ns, _)| ns.to_string());
        Self {
            urn,
            version: Version::default(),
            namespace,
            project: None,
            observables: vec![produces],
            dependencies: Vec::new(),
            coverage: Vec::new(),
            computation: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn covering(mut self, scale: Scale) -> Self {
        self.coverage.push(scale);
        self
    }

    pub fn computing(mut self, step: Contextualizable) -> Self {
        self.computation.push(step);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn produces(&self, observable: &Observable) -> bool {
        self.observables.iter().any(|o| o.same_semantics(observable))
    }

    /// The part of `scale` this model claims to cover.
    pub fn coverage_over(&self, scale: &Scale) -> Coverage {
        if self.coverage.is_empty() {
            Coverage::full(scale.clone())
        } else {
            Coverage::of(scale.clone(), &self.coverage)
        }
    }

    /// Lowered computation steps, in declaration order.
    pub fn service_calls(&self) -> Vec<ServiceCall> {
        self.computation.iter().map(Contextualizable::lower).collect()
    }

    /// Resource URNs needed to run this model, including the model itself.
    pub fn requirements(&self) -> BTreeSet<String> {
        let mut reqs = BTreeSet::new();
        reqs.insert(self.urn.clone());
        for step in &self.computation {
            reqs.extend(step.requirements());
        }
        reqs
    }

    pub fn validate(&self) -> CatalogResult<()> {
        let malformed = |message: &str| CatalogError::MalformedModel {
            urn: self.urn.clone(),
            message: message.to_string(),
        };
        if self.urn.trim().is_empty() {
            return Err(malformed("empty URN"));
        }
        if self.observables.is_empty() {
            return Err(malformed("declares no observables"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(def: &str) -> Observable {
        def.parse().unwrap()
    }

    #[test]
    fn version_parsing() {
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
        assert_eq!("2".parse::<Version>().unwrap(), Version::new(2, 0, 0));
        assert!("1.x".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
    }

    #[test]
    fn lowering_uses_core_functors() {
        let lit = Contextualizable::literal(2i64).lower();
        assert_eq!(lit.encode(), "core.constant.resolver(value = 2)");

        let urns = Contextualizable::resources(["im:data.dem"]).lower();
        assert_eq!(urns.encode(), "core.urn.resolver(urns = [\"im:data.dem\"])");

        let expr = Contextualizable::expression("slope * 2").targeting("steep").lower();
        assert_eq!(
            expr.encode(),
            "core.expression.resolver(expression = \"slope * 2\", _target = \"steep\")"
        );
    }

    #[test]
    fn explicit_call_passes_through() {
        let call = ServiceCall::new("gis.terrain.slope").with("method", "horn");
        assert_eq!(Contextualizable::call(call.clone()).lower(), call);
        assert!(!call.is_core());
        assert!(CoreFunctor::Deferred.call().is_core());
    }

    #[test]
    fn requirements_collect_external_resources() {
        let model = Model::new("im.terrain.slope", obs("geography:Slope"))
            .computing(Contextualizable::resources(["im:data.dem"]))
            .computing(Contextualizable::call(ServiceCall::new("gis.terrain.slope")))
            .computing(Contextualizable::literal(1i64));
        let reqs: Vec<_> = model.requirements().into_iter().collect();
        assert_eq!(reqs, vec!["gis.terrain.slope", "im.terrain.slope", "im:data.dem"]);
    }

    #[test]
    fn namespace_defaults_from_urn() {
        let m = Model::new("im.terrain.slope", obs("geography:Slope"));
        assert_eq!(m.namespace, "im.terrain");
    }

    #[test]
    fn validate_rejects_empty_but_allows_self_dependency() {
        // A self-dependency is a cycle for the search to reject, not malformed metadata.
        let m = Model::new("m", obs("geography:Slope"))
            .depends_on(Dependency::new(obs("geography:Slope")));
        assert!(m.validate().is_ok());
        let mut empty = Model::new("m", obs("geography:Slope"));
        empty.observables.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn coverage_over_defaults_to_full() {
        let scale = Scale::time(0.0, 10.0).unwrap();
        let m = Model::new("m", obs("geography:Slope"));
        assert!(m.coverage_over(&scale).is_complete(0.0));
        let half = m.covering(Scale::time(0.0, 5.0).unwrap());
        assert!((half.coverage_over(&scale).fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn model_from_json() {
        let json = r#"{
            "urn": "im.hydro.runoff",
            "version": "1.1",
            "observables": ["hydrology:Runoff"],
            "dependencies": [
                "geography:Elevation",
                {"observable": "optional hydrology:Precipitation", "deferred": true}
            ],
            "computation": [
                {"kind": "call", "call": {"name": "hydro.runoff", "parameters": {"k": 0.3}}},
                {"kind": "literal", "value": 1, "target": "baseline"}
            ],
            "priority": 2
        }"#;
        let m: Model = serde_json::from_str(json).unwrap();
        assert_eq!(m.version, Version::new(1, 1, 0));
        assert_eq!(m.dependencies.len(), 2);
        assert!(m.dependencies[1].deferred);
        assert!(m.dependencies[1].observable.optional);
        assert_eq!(m.service_calls()[0].encode(), "hydro.runoff(k = 0.3)");
        assert_eq!(m.computation[1].target.as_deref(), Some("baseline"));
    }
}
