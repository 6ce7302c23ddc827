//! Rich diagnostic error types for the twinflow engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains. Every error also maps
//! onto the small fixed [`ErrorCode`] vocabulary reported at the service boundary.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boundary error vocabulary shared by all subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or unusable resource metadata, or an unreachable catalog.
    ResourceValidation,
    /// Something the resolution depends on could not be found.
    UnresolvedReference,
    /// A dependency chain leads back to itself.
    CircularReferences,
    /// A resource exists but not in the requested version.
    MismatchedVersion,
    /// Anything else, including contract violations by the caller.
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ResourceValidation => "RESOURCE_VALIDATION",
            ErrorCode::UnresolvedReference => "UNRESOLVED_REFERENCE",
            ErrorCode::CircularReferences => "CIRCULAR_REFERENCES",
            ErrorCode::MismatchedVersion => "MISMATCHED_VERSION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the twinflow engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum TwinflowError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scale(#[from] ScaleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dataflow(#[from] DataflowError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl TwinflowError {
    /// The boundary code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TwinflowError::Scale(_) => ErrorCode::ResourceValidation,
            TwinflowError::Catalog(e) => e.error_code(),
            TwinflowError::Resolution(e) => e.error_code(),
            TwinflowError::Dataflow(e) => e.error_code(),
            TwinflowError::Execution(_) => ErrorCode::InternalError,
            TwinflowError::Config(_) => ErrorCode::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// Scale errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ScaleError {
    #[error("invalid {dimension} extent [{start}, {end})")]
    #[diagnostic(
        code(twinflow::scale::invalid_extent),
        help(
            "Extents are half-open intervals and must have finite bounds with \
             start < end. Zero-width extents cannot be covered."
        )
    )]
    InvalidExtent {
        dimension: String,
        start: f64,
        end: f64,
    },

    #[error("dimension {dimension} appears more than once in a scale")]
    #[diagnostic(
        code(twinflow::scale::duplicate_dimension),
        help("A scale holds at most one extent per dimension.")
    )]
    DuplicateDimension { dimension: String },

    #[error("cannot split {dimension} into {parts} parts")]
    #[diagnostic(
        code(twinflow::scale::invalid_split),
        help("Split a dimension the scale actually has, into at least one part.")
    )]
    InvalidSplit { dimension: String, parts: usize },
}

// ---------------------------------------------------------------------------
// Catalog errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("{service} is unreachable: {message}")]
    #[diagnostic(
        code(twinflow::catalog::unreachable),
        help(
            "The resources or reasoner collaborator could not be reached. \
             Resolution cannot continue without it; retry once it is available."
        )
    )]
    Unreachable { service: String, message: String },

    #[error("malformed model {urn}: {message}")]
    #[diagnostic(
        code(twinflow::catalog::malformed_model),
        help("Every model needs a non-empty URN and at least one observable it produces.")
    )]
    MalformedModel { urn: String, message: String },

    #[error("malformed version string: {value:?}")]
    #[diagnostic(
        code(twinflow::catalog::malformed_version),
        help("Versions are written as MAJOR.MINOR.PATCH, e.g. 1.0.0.")
    )]
    MalformedVersion { value: String },

    #[error("model {urn} is at version {found}, but {required} was requested")]
    #[diagnostic(
        code(twinflow::catalog::mismatched_version),
        help("Remove the version pin from the resolution constraints or publish the pinned version.")
    )]
    MismatchedVersion {
        urn: String,
        required: String,
        found: String,
    },

    #[error("resource not found: {urn}")]
    #[diagnostic(
        code(twinflow::catalog::not_found),
        help("Check the URN, or load the catalog that provides it.")
    )]
    NotFound { urn: String },

    #[error("cannot interpret definition {definition:?}: {message}")]
    #[diagnostic(
        code(twinflow::catalog::malformed_definition),
        help("Observables are written as `[each] [optional] namespace:Concept`.")
    )]
    MalformedDefinition { definition: String, message: String },

    #[error("failed to read catalog at {path}")]
    #[diagnostic(
        code(twinflow::catalog::io),
        help("Ensure the catalog file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog at {path}: {message}")]
    #[diagnostic(
        code(twinflow::catalog::parse),
        help("The catalog is a JSON array of model definitions.")
    )]
    Parse { path: String, message: String },
}

impl CatalogError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CatalogError::NotFound { .. } => ErrorCode::UnresolvedReference,
            CatalogError::MismatchedVersion { .. } => ErrorCode::MismatchedVersion,
            _ => ErrorCode::ResourceValidation,
        }
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("resolution of {observable} failed: {source}")]
    #[diagnostic(
        code(twinflow::resolution::infrastructure),
        help(
            "A collaborator failed while looking up candidate models. \
             The whole request is aborted; partial plans are not produced in this case."
        )
    )]
    Infrastructure {
        observable: String,
        #[source]
        source: CatalogError,
    },

    #[error("invalid resolution request: {message}")]
    #[diagnostic(
        code(twinflow::resolution::invalid_request),
        help("A request needs an observable definition and a scope with a scale.")
    )]
    InvalidRequest { message: String },
}

impl ResolutionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ResolutionError::Infrastructure { source, .. } => source.error_code(),
            ResolutionError::InvalidRequest { .. } => ErrorCode::ResourceValidation,
        }
    }
}

/// Result type for resolution operations.
pub type ResolutionResult<T> = std::result::Result<T, ResolutionError>;

// ---------------------------------------------------------------------------
// Dataflow errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DataflowError {
    #[error("hook point {actuator_id} not found in the dataflow of context {context}")]
    #[diagnostic(
        code(twinflow::dataflow::hook_not_found),
        help(
            "The scope's current observation must be an actuator of the dataflow being \
             extended. This is a caller bug: attach at the root or pass the right scope."
        )
    )]
    HookNotFound { actuator_id: u64, context: String },

    #[error("actuator id allocator exhausted")]
    #[diagnostic(
        code(twinflow::dataflow::ids_exhausted),
        help("The actuator id space (2^64 - 1 ids) is exhausted; check for allocation loops.")
    )]
    IdSpaceExhausted,

    #[error("dataflow nesting exceeds the maximum of {max_depth}")]
    #[diagnostic(
        code(twinflow::dataflow::depth_exceeded),
        help("Raise `max_encode_depth` in the resolver configuration if deeper plans are expected.")
    )]
    DepthExceeded { max_depth: usize },
}

impl DataflowError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::InternalError
    }
}

/// Result type for dataflow operations.
pub type DataflowResult<T> = std::result::Result<T, DataflowError>;

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    #[error("actuator {actuator_id} failed in {call}: {message}")]
    #[diagnostic(
        code(twinflow::execution::step_failed),
        help("A computation step raised an error; the observation stays unresolved.")
    )]
    StepFailed {
        actuator_id: u64,
        call: String,
        message: String,
    },

    #[error("no component is registered for service call {call}")]
    #[diagnostic(
        code(twinflow::execution::unknown_call),
        help("Register a contextualizer for this call name in the component registry.")
    )]
    UnknownServiceCall { call: String },

    #[error("actuator {actuator_id} references {referenced}, which has not been computed")]
    #[diagnostic(
        code(twinflow::execution::missing_reference),
        help("Reference actuators may only point at actuators that run earlier in the plan.")
    )]
    MissingReference { actuator_id: u64, referenced: u64 },

    #[error("execution was cancelled")]
    #[diagnostic(code(twinflow::execution::cancelled))]
    Cancelled,

    #[error("the dataflow is empty and has no target observation")]
    #[diagnostic(
        code(twinflow::execution::nothing_to_run),
        help("Empty dataflows are legal but produce nothing; check the resolution notifications.")
    )]
    NothingToRun,

    #[error("execution worker panicked")]
    #[diagnostic(code(twinflow::execution::worker_panicked))]
    WorkerPanicked,

    #[error("knowledge graph error: {message}")]
    #[diagnostic(
        code(twinflow::execution::twin),
        help("The digital twin rejected an update or could not be persisted.")
    )]
    Twin { message: String },
}

/// Result type for execution operations.
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read resolver config: {path}")]
    #[diagnostic(
        code(twinflow::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse resolver config {path}: {message}")]
    #[diagnostic(
        code(twinflow::config::parse),
        help("Check the TOML syntax in the resolver config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write resolver config: {path}")]
    #[diagnostic(
        code(twinflow::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(twinflow::config::invalid), help("Check the ResolverConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning twinflow results.
pub type TwinflowResult<T> = std::result::Result<T, TwinflowError>;
