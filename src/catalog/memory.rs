//! In-memory resources catalog.
//!
//! Models are indexed by URN and by the concept of every observable they
//! produce. Catalogs can be loaded from a JSON array of model definitions.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{CatalogError, CatalogResult};
use crate::model::Model;
use crate::observable::Observable;
use crate::scope::ContextScope;

use super::ResourcesService;

pub struct InMemoryCatalog {
    models: DashMap<String, Arc<Model>>,
    /// Concept URN → URNs of models producing it.
    by_concept: DashMap<String, Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
            by_concept: DashMap::new(),
        }
    }

    /// Add or replace a model. Malformed models are rejected.
    pub fn insert(&self, model: Model) -> CatalogResult<()> {
        model.validate()?;
        if let Some((_, old)) = self.models.remove(&model.urn) {
            for o in &old.observables {
                if let Some(mut urns) = self.by_concept.get_mut(o.concept.urn()) {
                    urns.retain(|u| *u != old.urn);
                }
            }
        }
        for o in &model.observables {
            let mut urns = self.by_concept.entry(o.concept.urn().to_string()).or_default();
            if !urns.contains(&model.urn) {
                urns.push(model.urn.clone());
            }
        }
        tracing::debug!(model = %model.urn, version = %model.version, "model registered");
        self.models.insert(model.urn.clone(), Arc::new(model));
        Ok(())
    }

    /// Parse a JSON array of models and add them all.
    pub fn load_json_str(&self, json: &str, origin: &str) -> CatalogResult<usize> {
        let models: Vec<Model> = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        let count = models.len();
        for model in models {
            self.insert(model)?;
        }
        Ok(count)
    }

    pub fn load_json(&self, path: &Path) -> CatalogResult<usize> {
        let json = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let count = self.load_json_str(&json, &path.display().to_string())?;
        tracing::info!(path = %path.display(), models = count, "catalog loaded");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn urns(&self) -> Vec<String> {
        let mut urns: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        urns.sort();
        urns
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("models", &self.models.len())
            .field("concepts", &self.by_concept.len())
            .finish()
    }
}

impl ResourcesService for InMemoryCatalog {
    fn resolve_models(
        &self,
        observable: &Observable,
        _scope: &ContextScope,
    ) -> CatalogResult<Vec<Arc<Model>>> {
        let Some(urns) = self.by_concept.get(observable.concept.urn()) else {
            return Ok(Vec::new());
        };
        let mut models: Vec<Arc<Model>> = urns
            .iter()
            .filter_map(|u| self.models.get(u).map(|m| Arc::clone(m.value())))
            .filter(|m| m.produces(observable))
            .collect();
        models.sort_by(|a, b| a.urn.cmp(&b.urn));
        Ok(models)
    }

    fn retrieve_model(&self, urn: &str) -> CatalogResult<Arc<Model>> {
        self.models
            .get(urn)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| CatalogError::NotFound {
                urn: urn.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::Scale;

    fn obs(def: &str) -> Observable {
        def.parse().unwrap()
    }

    #[test]
    fn insert_and_resolve() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(Model::new("m.slope", obs("geography:Slope"))).unwrap();
        catalog.insert(Model::new("m.trees", obs("each ecology:Tree"))).unwrap();
        let scope = ContextScope::new("ctx", Scale::scalar());

        assert_eq!(catalog.resolve_models(&obs("geography:Slope"), &scope).unwrap().len(), 1);
        assert!(catalog.resolve_models(&obs("ecology:Tree"), &scope).unwrap().is_empty());
        assert_eq!(catalog.resolve_models(&obs("each ecology:Tree"), &scope).unwrap().len(), 1);
    }

    #[test]
    fn replace_model_updates_concept_index() {
        let catalog = InMemoryCatalog::new();
        catalog.insert(Model::new("m", obs("geography:Slope"))).unwrap();
        catalog.insert(Model::new("m", obs("geography:Aspect"))).unwrap();
        let scope = ContextScope::new("ctx", Scale::scalar());
        assert!(catalog.resolve_models(&obs("geography:Slope"), &scope).unwrap().is_empty());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn retrieve_missing_is_not_found() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            catalog.retrieve_model("nope"),
            Err(CatalogError::NotFound { .. })
        ));
    }

    #[test]
    fn load_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"[{"urn": "m.a", "observables": ["geography:Slope"]},
                {"urn": "m.b", "observables": ["geography:Aspect"], "dependencies": ["geography:Slope"]}]"#,
        )
        .unwrap();
        let catalog = InMemoryCatalog::new();
        assert_eq!(catalog.load_json(&path).unwrap(), 2);
        assert_eq!(catalog.urns(), vec!["m.a", "m.b"]);
    }

    #[test]
    fn load_json_rejects_garbage() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            catalog.load_json_str("{not json", "inline"),
            Err(CatalogError::Parse { .. })
        ));
    }
}
