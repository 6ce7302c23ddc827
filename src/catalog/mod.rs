//! Candidate model index.
//!
//! The resolver never talks to the catalog or the reasoner directly. It asks
//! the [`CandidateIndex`] for a ranked list of [`Candidate`]s that could
//! produce an observable over what is still uncovered. The index is backed by
//! two collaborator contracts, [`ResourcesService`] and [`Reasoner`], with
//! in-memory implementations in [`memory`] and [`taxonomy`].

pub mod memory;
pub mod taxonomy;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;

use crate::coverage::Coverage;
use crate::error::{CatalogResult, ErrorCode};
use crate::model::{Dependency, Model, Version};
use crate::notification::Notification;
use crate::observable::{Concept, Observable, ResolutionMode};
use crate::scope::ContextScope;

pub use memory::InMemoryCatalog;
pub use taxonomy::TaxonomyReasoner;

/// Catalog of models and other URN-addressed resources.
pub trait ResourcesService: Send + Sync {
    /// Models that produce exactly `observable`'s concept. Finding none is not
    /// an error.
    fn resolve_models(
        &self,
        observable: &Observable,
        scope: &ContextScope,
    ) -> CatalogResult<Vec<Arc<Model>>>;

    fn retrieve_model(&self, urn: &str) -> CatalogResult<Arc<Model>>;
}

/// Concept and observable semantics.
pub trait Reasoner: Send + Sync {
    fn resolve_concept(&self, definition: &str) -> CatalogResult<Concept>;

    fn resolve_observable(&self, definition: &str) -> CatalogResult<Observable>;

    /// All concepts strictly more specific than `concept`, nearest first.
    fn subsumed(&self, concept: &Concept) -> CatalogResult<Vec<Concept>>;
}

/// One way to produce an observable.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: Arc<Model>,
    /// What the model claims over the scope's scale.
    pub coverage: Coverage,
    /// Dependencies still to be resolved, in declaration order.
    pub dependencies: Vec<Dependency>,
    /// `false` when the model produces a subsumed concept.
    pub exact: bool,
    preferred: bool,
}

/// Candidates plus whatever was worth telling the user while finding them.
#[derive(Debug, Default)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    pub notifications: Vec<Notification>,
}

pub struct CandidateIndex {
    resources: Arc<dyn ResourcesService>,
    reasoner: Arc<dyn Reasoner>,
}

impl CandidateIndex {
    pub fn new(resources: Arc<dyn ResourcesService>, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            resources,
            reasoner,
        }
    }

    pub fn resources(&self) -> &Arc<dyn ResourcesService> {
        &self.resources
    }

    pub fn reasoner(&self) -> &Arc<dyn Reasoner> {
        &self.reasoner
    }

    /// Ranked candidates for `observable` that can contribute something to
    /// `remainder`.
    ///
    /// Fails only when a collaborator fails or publishes a malformed model.
    pub fn candidates(
        &self,
        observable: &Observable,
        scope: &ContextScope,
        remainder: &Coverage,
    ) -> CatalogResult<CandidateSet> {
        let mut found: Vec<(Arc<Model>, bool)> = self
            .resources
            .resolve_models(observable, scope)?
            .into_iter()
            .map(|m| (m, true))
            .collect();

        if observable.mode == ResolutionMode::Any {
            for concept in self.reasoner.subsumed(&observable.concept)? {
                let mut specific = Observable::new(concept);
                specific.collective = observable.collective;
                found.extend(
                    self.resources
                        .resolve_models(&specific, scope)?
                        .into_iter()
                        .map(|m| (m, false)),
                );
            }
        }

        let mut seen = HashSet::new();
        found.retain(|(m, _)| seen.insert(m.urn.clone()));

        let mut set = CandidateSet::default();
        let excluded = scope.constraints.excluded_models();
        let mut admitted = Vec::with_capacity(found.len());
        for (model, exact) in found {
            model.validate()?;
            if excluded.contains(model.urn.as_str()) {
                tracing::debug!(model = %model.urn, "model excluded by constraint");
                continue;
            }
            if let Some(pin) = scope.constraints.pinned_version(&model.urn) {
                match pin.parse::<Version>() {
                    Ok(required) if required == model.version => {}
                    Ok(required) => {
                        set.notifications.push(
                            Notification::warning(
                                ErrorCode::MismatchedVersion,
                                format!(
                                    "model {} is at version {}, but {} was requested",
                                    model.urn, model.version, required
                                ),
                            )
                            .about(observable.urn()),
                        );
                        continue;
                    }
                    Err(e) => {
                        set.notifications.push(
                            Notification::warning(ErrorCode::ResourceValidation, e.to_string())
                                .about(observable.urn()),
                        );
                        continue;
                    }
                }
            }
            admitted.push((model, exact));
        }

        let namespaces = scope.constraints.preferred_namespaces();
        let projects = scope.constraints.preferred_projects();
        let scale = scope.scale.clone();

        let mut candidates: Vec<Candidate> = admitted
            .into_par_iter()
            .filter_map(|(model, exact)| {
                let coverage = model.coverage_over(&scale);
                if coverage.intersect(remainder).is_empty() {
                    return None;
                }
                let preferred = namespaces.contains(&model.namespace.as_str())
                    || model
                        .project
                        .as_deref()
                        .is_some_and(|p| projects.contains(&p));
                Some(Candidate {
                    dependencies: model.dependencies.clone(),
                    model,
                    coverage,
                    exact,
                    preferred,
                })
            })
            .collect();

        candidates.sort_by(rank);
        tracing::debug!(
            observable = %observable,
            candidates = candidates.len(),
            "candidate lookup"
        );
        set.candidates = candidates;
        Ok(set)
    }
}

/// Scope-preferred first, then priority, then exact matches, then larger
/// declared coverage, then URN.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.preferred
        .cmp(&a.preferred)
        .then_with(|| b.model.priority.cmp(&a.model.priority))
        .then_with(|| b.exact.cmp(&a.exact))
        .then_with(|| {
            b.coverage
                .fraction()
                .partial_cmp(&a.coverage.fraction())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.model.urn.cmp(&b.model.urn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::scale::{Dimension, Extent, Scale};
    use crate::scope::{ResolutionConstraint, ResolutionConstraints};

    fn obs(def: &str) -> Observable {
        def.parse().unwrap()
    }

    fn scale() -> Scale {
        Scale::time(0.0, 10.0).unwrap()
    }

    fn index(models: Vec<Model>) -> CandidateIndex {
        let catalog = InMemoryCatalog::new();
        for m in models {
            catalog.insert(m).unwrap();
        }
        let reasoner = TaxonomyReasoner::new();
        reasoner
            .add_is_a(
                &Concept::new("geography:Elevation").unwrap(),
                &Concept::new("geography:Height").unwrap(),
            )
            .unwrap();
        CandidateIndex::new(Arc::new(catalog), Arc::new(reasoner))
    }

    fn urns(set: &CandidateSet) -> Vec<&str> {
        set.candidates.iter().map(|c| c.model.urn.as_str()).collect()
    }

    #[test]
    fn no_candidates_is_empty_not_error() {
        let idx = index(vec![]);
        let scope = ContextScope::new("ctx", scale());
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert!(set.candidates.is_empty());
    }

    #[test]
    fn ranking_priority_then_coverage_then_urn() {
        let half = Scale::time(0.0, 5.0).unwrap();
        let idx = index(vec![
            Model::new("b.full", obs("geography:Slope")),
            Model::new("a.full", obs("geography:Slope")),
            Model::new("c.half", obs("geography:Slope")).covering(half),
            Model::new("d.prio", obs("geography:Slope"))
                .covering(Scale::time(0.0, 1.0).unwrap())
                .with_priority(5),
        ]);
        let scope = ContextScope::new("ctx", scale());
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert_eq!(urns(&set), vec!["d.prio", "a.full", "b.full", "c.half"]);
    }

    #[test]
    fn preferred_namespace_ranks_first() {
        let idx = index(vec![
            Model::new("x.slope", obs("geography:Slope")).with_priority(9),
            Model::new("mine.slope", obs("geography:Slope")),
        ]);
        let scope = ContextScope::new("ctx", scale()).with_resolution_constraints(
            &ResolutionConstraints::new().with(ResolutionConstraint::namespace("mine")),
        );
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert_eq!(urns(&set), vec!["mine.slope", "x.slope"]);
    }

    #[test]
    fn candidates_outside_remainder_are_dropped() {
        let first_half = Scale::time(0.0, 5.0).unwrap();
        let idx = index(vec![Model::new("m.early", obs("geography:Slope")).covering(first_half.clone())]);
        let scope = ContextScope::new("ctx", scale());
        let remainder = Coverage::remainder(&scale(), &Coverage::of(scale(), [&first_half]));
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &remainder)
            .unwrap();
        assert!(set.candidates.is_empty());
    }

    #[test]
    fn exclusion_and_version_pin() {
        let idx = index(vec![
            Model::new("m.one", obs("geography:Slope")).with_version(Version::new(1, 0, 0)),
            Model::new("m.two", obs("geography:Slope")),
        ]);
        let constraints = ResolutionConstraints::new()
            .with(ResolutionConstraint::exclude_model("m.two"))
            .with(ResolutionConstraint::model_version("m.one", Version::new(2, 0, 0)));
        let scope = ContextScope::new("ctx", scale()).with_resolution_constraints(&constraints);
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert!(set.candidates.is_empty());
        assert_eq!(set.notifications.len(), 1);
        assert_eq!(set.notifications[0].code, Some(ErrorCode::MismatchedVersion));
    }

    #[test]
    fn any_mode_includes_subsumed_after_exact() {
        let idx = index(vec![
            Model::new("m.elevation", obs("geography:Elevation")).with_priority(1),
            Model::new("m.height", obs("geography:Height")),
        ]);
        let scope = ContextScope::new("ctx", scale());
        let exact = idx
            .candidates(&obs("geography:Height"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert_eq!(urns(&exact), vec!["m.height"]);

        let any = idx
            .candidates(&obs("any geography:Height"), &scope, &Coverage::full(scale()))
            .unwrap();
        assert_eq!(urns(&any), vec!["m.elevation", "m.height"]);
        assert!(!any.candidates[0].exact);
    }

    struct Unreachable;

    impl ResourcesService for Unreachable {
        fn resolve_models(&self, _: &Observable, _: &ContextScope) -> CatalogResult<Vec<Arc<Model>>> {
            Err(CatalogError::Unreachable {
                service: "resources".into(),
                message: "connection refused".into(),
            })
        }

        fn retrieve_model(&self, urn: &str) -> CatalogResult<Arc<Model>> {
            Err(CatalogError::NotFound { urn: urn.into() })
        }
    }

    #[test]
    fn collaborator_failure_propagates() {
        let idx = CandidateIndex::new(Arc::new(Unreachable), Arc::new(TaxonomyReasoner::new()));
        let scope = ContextScope::new("ctx", scale());
        let err = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(scale()))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Unreachable { .. }));
    }

    #[test]
    fn partial_dimension_coverage_is_applied() {
        let idx = index(vec![Model::new("m.x", obs("geography:Slope")).covering(
            Scale::new(vec![Extent::new(Dimension::X, 0.0, 1.0).unwrap()]).unwrap(),
        )]);
        let region = Scale::space(0.0, 4.0, 0.0, 4.0).unwrap();
        let scope = ContextScope::new("ctx", region.clone());
        let set = idx
            .candidates(&obs("geography:Slope"), &scope, &Coverage::full(region))
            .unwrap();
        assert!((set.candidates[0].coverage.fraction() - 0.25).abs() < 1e-9);
    }
}
