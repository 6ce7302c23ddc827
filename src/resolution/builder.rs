//! Coverage-driven depth-first search for a resolution.
//!
//! For each observable the builder walks the ranked candidates, resolving
//! each candidate's dependencies before accepting it and stopping as soon as
//! the accumulated coverage is complete. A candidate whose mandatory
//! dependency cannot be resolved is rolled back: every node created on its
//! behalf is discarded. Cycles, the depth bound and the deadline fail only
//! the branch they occur in; collaborator failures abort the whole search.
//!
//! Recursion depth is bounded by `max_depth`, so pathological catalogs fail
//! predictably instead of exhausting the stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{Candidate, CandidateIndex};
use crate::config::ResolverConfig;
use crate::coverage::Coverage;
use crate::error::{ErrorCode, ResolutionError, ResolutionResult};
use crate::notification::Notification;
use crate::observable::Observable;
use crate::scale::Scale;
use crate::scope::{ContextScope, ResolutionConstraint, ResolutionConstraints};

use super::{BranchOutcome, DependencyLink, NodeId, NodeModel, Resolution, ResolutionNode};

pub struct ResolutionBuilder<'a> {
    index: &'a CandidateIndex,
    config: &'a ResolverConfig,
}

impl<'a> ResolutionBuilder<'a> {
    pub fn new(index: &'a CandidateIndex, config: &'a ResolverConfig) -> Self {
        Self { index, config }
    }

    /// Resolve `observable` over the scope's scale.
    ///
    /// Logical failures (nothing found, partial coverage, cycles) come back
    /// in-band in the returned [`Resolution`]. Only collaborator failures are
    /// errors.
    pub fn resolve(
        &self,
        observable: &Observable,
        scope: &ContextScope,
    ) -> ResolutionResult<Resolution> {
        let started = Instant::now();
        let mut search = Search {
            index: self.index,
            config: self.config,
            nodes: Vec::new(),
            path: HashSet::new(),
            resolved: HashMap::new(),
            notifications: Vec::new(),
            deadline: self.config.timeout().map(|t| started + t),
            timed_out: false,
        };
        let branch = search.resolve_branch(observable, scope, 0)?;

        let resolution = Resolution {
            observable: observable.clone(),
            scale: scope.scale.clone(),
            nodes: search.nodes,
            roots: branch.nodes,
            coverage: branch.coverage,
            outcome: branch.outcome,
            notifications: search.notifications,
            tolerance: self.config.completeness_tolerance,
        };
        tracing::info!(
            observable = %observable,
            nodes = resolution.len(),
            coverage = resolution.coverage.fraction(),
            outcome = ?resolution.outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolution finished"
        );
        Ok(resolution)
    }
}

#[derive(Debug, Clone)]
struct Branch {
    outcome: BranchOutcome,
    nodes: Vec<NodeId>,
    coverage: Coverage,
}

impl Branch {
    fn failed(outcome: BranchOutcome, scale: &Scale) -> Self {
        Self {
            outcome,
            nodes: Vec::new(),
            coverage: Coverage::empty(scale.clone()),
        }
    }
}

struct Search<'a> {
    index: &'a CandidateIndex,
    config: &'a ResolverConfig,
    nodes: Vec<ResolutionNode>,
    /// Keys of the observables on the current path.
    path: HashSet<String>,
    /// Completely resolved branches, keyed by observable, scale and ranking
    /// preferences.
    resolved: HashMap<String, Branch>,
    notifications: Vec<Notification>,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl Search<'_> {
    fn notify(&mut self, notification: Notification) {
        notification.trace();
        self.notifications.push(notification);
    }

    fn expired(&mut self) -> bool {
        if !self.timed_out && self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.timed_out = true;
            self.notify(Notification::warning(
                ErrorCode::UnresolvedReference,
                "resolution deadline reached, keeping what was found so far",
            ));
        }
        self.timed_out
    }

    fn resolve_branch(
        &mut self,
        observable: &Observable,
        scope: &ContextScope,
        depth: usize,
    ) -> ResolutionResult<Branch> {
        let key = format!("{}@{}", observable.key(), scope.scale);

        if self.path.contains(&key) {
            self.notify(
                Notification::warning(
                    ErrorCode::CircularReferences,
                    format!("circular dependency at depth {depth}"),
                )
                .about(observable.urn()),
            );
            return Ok(Branch::failed(BranchOutcome::Cycle, &scope.scale));
        }
        if depth > self.config.max_depth {
            self.notify(
                Notification::warning(
                    ErrorCode::UnresolvedReference,
                    format!("dependency depth exceeds {}", self.config.max_depth),
                )
                .about(observable.urn()),
            );
            return Ok(Branch::failed(BranchOutcome::DepthExceeded, &scope.scale));
        }
        // Ranking depends on the namespace and project preferences the branch
        // inherits, so a branch is only reused under the same preferences.
        let cache_key = branch_cache_key(&key, &scope.constraints);
        if let Some(branch) = self.resolved.get(&cache_key) {
            tracing::debug!(observable = %observable, depth, "reusing resolved branch");
            return Ok(branch.clone());
        }
        if self.expired() {
            return Ok(Branch::failed(BranchOutcome::TimedOut, &scope.scale));
        }

        self.path.insert(key.clone());
        let result = self.search(observable, scope, depth);
        self.path.remove(&key);

        let branch = result?;
        if branch.outcome == BranchOutcome::Resolved {
            self.resolved.insert(cache_key, branch.clone());
        }
        Ok(branch)
    }

    fn search(
        &mut self,
        observable: &Observable,
        scope: &ContextScope,
        depth: usize,
    ) -> ResolutionResult<Branch> {
        let tolerance = self.config.completeness_tolerance;
        let mut accumulated = Coverage::empty(scope.scale.clone());
        let remainder = Coverage::remainder(&scope.scale, &accumulated);

        let set = self
            .index
            .candidates(observable, scope, &remainder)
            .map_err(|source| ResolutionError::Infrastructure {
                observable: observable.to_string(),
                source,
            })?;
        for n in set.notifications {
            self.notify(n);
        }
        tracing::debug!(
            observable = %observable,
            depth,
            candidates = set.candidates.len(),
            "searching candidates"
        );

        let mut accepted = Vec::new();
        for candidate in &set.candidates {
            if accumulated.is_complete(tolerance) || self.expired() {
                break;
            }
            if accumulated.gain(&candidate.coverage) < self.config.min_contribution {
                tracing::debug!(model = %candidate.model.urn, "candidate adds no new coverage");
                continue;
            }

            let checkpoint = self.nodes.len();
            let Some(id) = self.try_candidate(observable, scope, candidate, depth)? else {
                self.rollback(checkpoint);
                continue;
            };
            let coverage = &self.nodes[id.0].coverage;
            if accumulated.gain(coverage) < self.config.min_contribution {
                tracing::debug!(
                    model = %candidate.model.urn,
                    "candidate adds no new coverage once dependencies are accounted for"
                );
                self.rollback(checkpoint);
                continue;
            }
            accumulated = accumulated.merge(coverage);
            tracing::debug!(
                observable = %observable,
                model = %candidate.model.urn,
                coverage = accumulated.fraction(),
                "candidate accepted"
            );
            accepted.push(id);
        }

        let outcome = if accepted.is_empty() {
            if self.timed_out {
                BranchOutcome::TimedOut
            } else {
                self.notify(
                    Notification::warning(
                        ErrorCode::UnresolvedReference,
                        "no model can resolve this observable",
                    )
                    .about(observable.urn()),
                );
                BranchOutcome::Unresolved
            }
        } else if accumulated.is_complete(tolerance) {
            BranchOutcome::Resolved
        } else {
            self.notify(
                Notification::warning(
                    ErrorCode::UnresolvedReference,
                    format!(
                        "only {:.1}% of {} could be covered",
                        accumulated.fraction() * 100.0,
                        scope.scale
                    ),
                )
                .about(observable.urn()),
            );
            BranchOutcome::Partial
        };

        Ok(Branch {
            outcome,
            nodes: accepted,
            coverage: accumulated,
        })
    }

    /// Resolve a candidate's dependencies and create its node. `None` rejects
    /// the candidate; the caller rolls back whatever was created meanwhile.
    fn try_candidate(
        &mut self,
        observable: &Observable,
        scope: &ContextScope,
        candidate: &Candidate,
        depth: usize,
    ) -> ResolutionResult<Option<NodeId>> {
        let model = &candidate.model;

        let mut preferences = ResolutionConstraints::new();
        if !model.namespace.is_empty() {
            preferences.add(ResolutionConstraint::namespace(model.namespace.as_str()));
        }
        if let Some(project) = &model.project {
            preferences.add(ResolutionConstraint::project(project.as_str()));
        }
        let dep_scope = scope.with_resolution_constraints(&preferences);

        let mut coverage = candidate.coverage.clone();
        let mut links = Vec::with_capacity(candidate.dependencies.len());

        for dep in &candidate.dependencies {
            let dep_scale = dep.scale.clone().unwrap_or_else(|| scope.scale.clone());

            if dep.deferred {
                let full = Coverage::full(dep_scale.clone());
                let id = self.push(dep.observable.clone(), dep_scale, NodeModel::Deferred, full, Vec::new());
                links.push(DependencyLink {
                    observable: dep.observable.clone(),
                    nodes: vec![id],
                });
                continue;
            }

            let branch =
                self.resolve_branch(&dep.observable, &dep_scope.at_scale(dep_scale.clone()), depth + 1)?;

            if !branch.nodes.is_empty() {
                if !dep.observable.optional && dep.scale.is_none() {
                    coverage = coverage.intersect(&branch.coverage);
                }
                links.push(DependencyLink {
                    observable: dep.observable.clone(),
                    nodes: branch.nodes,
                });
            } else if let Some(value) = &dep.observable.default_value {
                self.notify(
                    Notification::info(format!("using default value {value}"))
                        .about(dep.observable.urn()),
                );
                let full = Coverage::full(dep_scale.clone());
                let node = NodeModel::Constant(value.clone());
                let id = self.push(dep.observable.clone(), dep_scale, node, full, Vec::new());
                links.push(DependencyLink {
                    observable: dep.observable.clone(),
                    nodes: vec![id],
                });
            } else if dep.observable.optional {
                self.notify(
                    Notification::warning(
                        ErrorCode::UnresolvedReference,
                        format!("optional dependency of {} left unresolved", model.urn),
                    )
                    .about(dep.observable.urn()),
                );
                let empty = Coverage::empty(dep_scale.clone());
                let id = self.push(dep.observable.clone(), dep_scale, NodeModel::Unresolved, empty, Vec::new());
                links.push(DependencyLink {
                    observable: dep.observable.clone(),
                    nodes: vec![id],
                });
            } else {
                self.notify(
                    Notification::warning(
                        ErrorCode::UnresolvedReference,
                        format!(
                            "model {} rejected: dependency {} could not be resolved",
                            model.urn,
                            dep.observable.urn()
                        ),
                    )
                    .about(observable.urn()),
                );
                return Ok(None);
            }
        }

        if coverage.is_empty() {
            self.notify(
                Notification::warning(
                    ErrorCode::UnresolvedReference,
                    format!(
                        "model {} rejected: its dependencies cover none of its extent",
                        model.urn
                    ),
                )
                .about(observable.urn()),
            );
            return Ok(None);
        }

        let id = self.push(
            observable.clone(),
            scope.scale.clone(),
            NodeModel::Model(Arc::clone(model)),
            coverage,
            links,
        );
        Ok(Some(id))
    }

    fn push(
        &mut self,
        observable: Observable,
        scale: Scale,
        model: NodeModel,
        coverage: Coverage,
        dependencies: Vec<DependencyLink>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ResolutionNode {
            id,
            observable,
            scale,
            model,
            coverage,
            dependencies,
        });
        id
    }

    /// Discard every node created since `checkpoint`, and any cached branch
    /// that points at one of them.
    fn rollback(&mut self, checkpoint: usize) {
        if self.nodes.len() > checkpoint {
            self.nodes.truncate(checkpoint);
            self.resolved
                .retain(|_, b| b.nodes.iter().all(|n| n.0 < checkpoint));
        }
    }
}

fn branch_cache_key(key: &str, constraints: &ResolutionConstraints) -> String {
    let mut namespaces = constraints.preferred_namespaces();
    namespaces.sort_unstable();
    namespaces.dedup();
    let mut projects = constraints.preferred_projects();
    projects.sort_unstable();
    projects.dedup();
    format!("{key}|{}|{}", namespaces.join(","), projects.join(","))
}
