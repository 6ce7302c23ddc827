//! A minimal reasoner over an explicit is-a taxonomy.
//!
//! Concepts are nodes of a petgraph `DiGraph`; an edge `child → parent`
//! records that `child` is a kind of `parent`. Subsumption queries walk
//! incoming edges breadth-first.

use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{CatalogError, CatalogResult};
use crate::observable::{Concept, Observable};

use super::Reasoner;

pub struct TaxonomyReasoner {
    graph: RwLock<DiGraph<Concept, ()>>,
    index: DashMap<Concept, NodeIndex>,
    /// Reject concepts that are not in the taxonomy.
    strict: bool,
}

impl TaxonomyReasoner {
    /// A lenient reasoner: any syntactically valid concept is accepted.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            index: DashMap::new(),
            strict: false,
        }
    }

    /// A reasoner that only knows the concepts it has been told about.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::new()
        }
    }

    fn ensure_node(&self, concept: &Concept) -> NodeIndex {
        if let Some(idx) = self.index.get(concept) {
            return *idx.value();
        }
        let mut graph = self.graph.write().expect("taxonomy lock poisoned");
        if let Some(idx) = self.index.get(concept) {
            return *idx.value();
        }
        let idx = graph.add_node(concept.clone());
        self.index.insert(concept.clone(), idx);
        idx
    }

    pub fn add_concept(&self, concept: &Concept) {
        self.ensure_node(concept);
    }

    /// Record that `child` is a kind of `parent`.
    pub fn add_is_a(&self, child: &Concept, parent: &Concept) -> CatalogResult<()> {
        if child == parent || self.subsumes(child, parent) {
            return Err(CatalogError::MalformedDefinition {
                definition: format!("{child} is-a {parent}"),
                message: "the taxonomy would become cyclic".into(),
            });
        }
        let c = self.ensure_node(child);
        let p = self.ensure_node(parent);
        let mut graph = self.graph.write().expect("taxonomy lock poisoned");
        if graph.find_edge(c, p).is_none() {
            graph.add_edge(c, p, ());
        }
        Ok(())
    }

    /// Whether `general` subsumes `specific` (reflexively).
    pub fn subsumes(&self, general: &Concept, specific: &Concept) -> bool {
        general == specific || self.descendants(general).iter().any(|c| c == specific)
    }

    pub fn concept_count(&self) -> usize {
        self.index.len()
    }

    fn descendants(&self, concept: &Concept) -> Vec<Concept> {
        let Some(start) = self.index.get(concept).map(|i| *i.value()) else {
            return Vec::new();
        };
        let graph = self.graph.read().expect("taxonomy lock poisoned");
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();
        while let Some(node) = queue.pop_front() {
            let mut children: Vec<NodeIndex> = graph
                .neighbors_directed(node, Direction::Incoming)
                .filter(|n| seen.insert(*n))
                .collect();
            children.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
            for child in children {
                out.push(graph[child].clone());
                queue.push_back(child);
            }
        }
        out
    }
}

impl Default for TaxonomyReasoner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaxonomyReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxonomyReasoner")
            .field("concepts", &self.concept_count())
            .field("strict", &self.strict)
            .finish()
    }
}

impl Reasoner for TaxonomyReasoner {
    fn resolve_concept(&self, definition: &str) -> CatalogResult<Concept> {
        let concept = Concept::new(definition.trim())?;
        if self.strict && !self.index.contains_key(&concept) {
            return Err(CatalogError::NotFound {
                urn: concept.urn().to_string(),
            });
        }
        Ok(concept)
    }

    fn resolve_observable(&self, definition: &str) -> CatalogResult<Observable> {
        let observable: Observable = definition.parse()?;
        self.resolve_concept(observable.concept.urn())?;
        Ok(observable)
    }

    fn subsumed(&self, concept: &Concept) -> CatalogResult<Vec<Concept>> {
        Ok(self.descendants(concept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(urn: &str) -> Concept {
        Concept::new(urn).unwrap()
    }

    #[test]
    fn subsumption_is_transitive_and_ordered() {
        let r = TaxonomyReasoner::new();
        r.add_is_a(&c("eco:Oak"), &c("eco:Tree")).unwrap();
        r.add_is_a(&c("eco:Tree"), &c("eco:Plant")).unwrap();
        r.add_is_a(&c("eco:Grass"), &c("eco:Plant")).unwrap();
        assert_eq!(
            r.subsumed(&c("eco:Plant")).unwrap(),
            vec![c("eco:Grass"), c("eco:Tree"), c("eco:Oak")]
        );
        assert!(r.subsumes(&c("eco:Plant"), &c("eco:Oak")));
        assert!(!r.subsumes(&c("eco:Oak"), &c("eco:Plant")));
    }

    #[test]
    fn cycles_are_rejected() {
        let r = TaxonomyReasoner::new();
        r.add_is_a(&c("a:B"), &c("a:A")).unwrap();
        assert!(r.add_is_a(&c("a:A"), &c("a:B")).is_err());
        assert!(r.add_is_a(&c("a:A"), &c("a:A")).is_err());
    }

    #[test]
    fn strict_reasoner_requires_known_concepts() {
        let r = TaxonomyReasoner::strict();
        r.add_concept(&c("geography:Slope"));
        assert!(r.resolve_observable("geography:Slope").is_ok());
        assert!(matches!(
            r.resolve_concept("geography:Aspect"),
            Err(CatalogError::NotFound { .. })
        ));
    }

    #[test]
    fn lenient_reasoner_checks_syntax_only() {
        let r = TaxonomyReasoner::new();
        assert!(r.resolve_concept("geography:Aspect").is_ok());
        assert!(r.resolve_concept("Aspect").is_err());
        assert!(r.subsumed(&c("geography:Aspect")).unwrap().is_empty());
    }
}
