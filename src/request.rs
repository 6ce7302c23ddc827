//! Wire-level request and response shapes for resolution.
//!
//! Requests arrive as JSON from network callers or the CLI:
//!
//! ```json
//! {
//!   "observation": "each ecology:Tree named trees",
//!   "scale": [{"dimension": "time", "start": 0.0, "end": 1.0}],
//!   "resolution_constraints": [{"name": "accept-partial", "values": [true]}]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::catalog::Reasoner;
use crate::dataflow::Dataflow;
use crate::error::{CatalogError, ResolutionError, ResolutionResult};
use crate::notification::Notification;
use crate::observable::Observable;
use crate::scale::Scale;
use crate::scope::ResolutionConstraints;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    /// Observable definition, e.g. `optional geography:Elevation`.
    pub observation: String,
    /// Overrides the context's scale when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(default)]
    pub resolution_constraints: ResolutionConstraints,
}

impl ResolutionRequest {
    pub fn new(observation: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            scale: None,
            resolution_constraints: ResolutionConstraints::new(),
        }
    }

    pub fn at_scale(mut self, scale: Scale) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_constraints(mut self, constraints: ResolutionConstraints) -> Self {
        self.resolution_constraints = constraints;
        self
    }

    /// Interpret the definition through `reasoner`. Definitions the reasoner
    /// rejects make the request invalid; a failing reasoner is an
    /// infrastructure error.
    pub fn observable(&self, reasoner: &dyn Reasoner) -> ResolutionResult<Observable> {
        reasoner
            .resolve_observable(&self.observation)
            .map_err(|source| match source {
                CatalogError::MalformedDefinition { .. } | CatalogError::NotFound { .. } => {
                    ResolutionError::InvalidRequest {
                        message: source.to_string(),
                    }
                }
                source => ResolutionError::Infrastructure {
                    observable: self.observation.clone(),
                    source,
                },
            })
    }

    pub fn from_json(json: &str) -> ResolutionResult<Self> {
        serde_json::from_str(json).map_err(|e| ResolutionError::InvalidRequest {
            message: format!("malformed request: {e}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub dataflow: Dataflow,
    /// Canonical text of `dataflow`.
    pub encoded: String,
    pub complete: bool,
    /// Covered fraction of the requested scale.
    pub coverage: f64,
    pub notifications: Vec<Notification>,
}

impl ResolutionResponse {
    pub fn to_json(&self) -> ResolutionResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ResolutionError::InvalidRequest {
            message: format!("cannot encode response: {e}"),
        })
    }
}
