//! Resolver service facade: top-level API for twinflow.
//!
//! The [`ResolverService`] owns the candidate index, the id allocator, the
//! executor and one running dataflow per context. It turns requests into
//! resolutions, resolutions into dataflows, splices those into the context's
//! dataflow, and submits them for execution.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::catalog::{CandidateIndex, Reasoner, ResourcesService};
use crate::config::ResolverConfig;
use crate::dataflow::{DataflowCompiler, DataflowEncoder, Dataflow, merge};
use crate::error::{ErrorCode, ResolutionResult, TwinflowResult};
use crate::id::{AtomicIdAllocator, IdAllocator};
use crate::notification::{Notification, NotificationSink};
use crate::observable::Observable;
use crate::request::{ResolutionRequest, ResolutionResponse};
use crate::resolution::{Resolution, ResolutionBuilder};
use crate::runtime::{ComponentRegistry, ExecutionHandle, Executor, KnowledgeGraph};
use crate::scope::ContextScope;

/// Summary of a service's state.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub contexts: usize,
    pub actuators: usize,
    pub next_actuator_id: Option<u64>,
    pub components: usize,
}

impl std::fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "twinflow resolver")?;
        writeln!(f, "  contexts: {}", self.contexts)?;
        writeln!(f, "  actuators: {}", self.actuators)?;
        writeln!(f, "  components: {}", self.components)?;
        match self.next_actuator_id {
            Some(id) => write!(f, "  next actuator id: {id}"),
            None => write!(f, "  next actuator id: -"),
        }
    }
}

pub struct ResolverService {
    config: ResolverConfig,
    index: CandidateIndex,
    allocator: Arc<dyn IdAllocator>,
    atomic: Option<Arc<AtomicIdAllocator>>,
    executor: Executor,
    encoder: DataflowEncoder,
    /// Receives the notifications of every dataflow produced.
    sink: Option<Arc<dyn NotificationSink>>,
    /// Each context's dataflow. The mutex serializes merges per context.
    dataflows: DashMap<String, Arc<Mutex<Dataflow>>>,
}

impl ResolverService {
    pub fn new(
        config: ResolverConfig,
        resources: Arc<dyn ResourcesService>,
        reasoner: Arc<dyn Reasoner>,
        twin: Arc<dyn KnowledgeGraph>,
    ) -> TwinflowResult<Self> {
        config.validate()?;
        let atomic = Arc::new(AtomicIdAllocator::new());
        let executor = Executor::new(twin, Arc::new(ComponentRegistry::core()), config.agent.clone());
        tracing::info!(
            max_depth = config.max_depth,
            tolerance = config.completeness_tolerance,
            "resolver service created"
        );
        Ok(Self {
            encoder: DataflowEncoder::new(config.max_encode_depth),
            index: CandidateIndex::new(resources, reasoner),
            allocator: atomic.clone(),
            atomic: Some(atomic),
            executor,
            sink: None,
            dataflows: DashMap::new(),
            config,
        })
    }

    /// Use `allocator` for actuator ids instead of the process-wide counter.
    pub fn with_allocator(mut self, allocator: Arc<dyn IdAllocator>) -> Self {
        self.allocator = allocator;
        self.atomic = None;
        self
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.executor = Executor::new(
            Arc::clone(self.executor.twin()),
            Arc::new(registry),
            self.config.agent.clone(),
        );
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn index(&self) -> &CandidateIndex {
        &self.index
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            contexts: self.dataflows.len(),
            actuators: self
                .dataflows
                .iter()
                .map(|d| d.value().lock().expect("dataflow lock poisoned").actuator_count())
                .sum(),
            next_actuator_id: self.atomic.as_ref().map(|a| a.peek_next()),
            components: self.executor.registry().len(),
        }
    }

    /// Interpret an observable definition through the reasoner.
    pub fn observable(&self, definition: &str) -> ResolutionResult<Observable> {
        ResolutionRequest::new(definition).observable(self.index.reasoner().as_ref())
    }

    /// Build the resolution graph for `observable` in `scope`.
    pub fn resolve(&self, observable: &Observable, scope: &ContextScope) -> ResolutionResult<Resolution> {
        let scope = with_geometry(scope)?;
        ResolutionBuilder::new(&self.index, &self.config).resolve(observable, &scope)
    }

    /// Whether partial coverage is acceptable in `scope`.
    pub fn accepts_partial(&self, scope: &ContextScope) -> bool {
        scope
            .constraints
            .accept_partial()
            .unwrap_or(self.config.accept_partial)
    }

    /// Resolve and compile. Nothing usable found, or partial coverage the
    /// scope does not accept, gives an empty dataflow with notifications.
    pub fn resolve_dataflow(&self, observable: &Observable, scope: &ContextScope) -> TwinflowResult<Dataflow> {
        let scope = &with_geometry(scope)?;
        let resolution = self.resolve(observable, scope)?;
        let mut dataflow = if resolution.is_empty() {
            let mut empty = Dataflow::empty(scope.scale.clone());
            empty.observable = Some(observable.clone());
            empty.notifications = resolution.notifications.clone();
            if !empty
                .notifications
                .iter()
                .any(|n| n.level >= crate::notification::Level::Warning)
            {
                empty.notifications.push(
                    Notification::warning(ErrorCode::UnresolvedReference, "nothing could be resolved")
                        .about(observable.urn()),
                );
            }
            empty
        } else if !resolution.is_complete() && !self.accepts_partial(scope) {
            let mut empty = Dataflow::empty(scope.scale.clone());
            empty.observable = Some(observable.clone());
            empty.notifications = resolution.notifications.clone();
            let rejected = Notification::warning(
                ErrorCode::UnresolvedReference,
                format!(
                    "partial resolution ({:.1}% covered) rejected; allow it with the accept-partial constraint",
                    resolution.coverage.fraction() * 100.0
                ),
            )
            .about(observable.urn());
            rejected.trace();
            empty.notifications.push(rejected);
            empty
        } else {
            DataflowCompiler::new(self.allocator.as_ref())
                .with_max_depth(self.config.max_encode_depth)
                .compile(&resolution)?
        };
        dataflow.notifications.dedup();
        if let Some(sink) = &self.sink {
            sink.emit_batch(&dataflow.notifications);
        }
        Ok(dataflow)
    }

    /// Answer a wire-level request without touching any context's dataflow.
    pub fn handle_request(&self, request: &ResolutionRequest, scope: &ContextScope) -> TwinflowResult<ResolutionResponse> {
        let observable = request.observable(self.index.reasoner().as_ref())?;
        let mut scope = scope.with_resolution_constraints(&request.resolution_constraints);
        if let Some(scale) = &request.scale {
            scope = scope.at_scale(scale.clone());
        }
        let dataflow = self.resolve_dataflow(&observable, &scope)?;
        Ok(ResolutionResponse {
            encoded: self.encoder.encode(&dataflow, &scope),
            complete: !dataflow.is_empty() && dataflow.coverage.is_complete(self.config.completeness_tolerance),
            coverage: dataflow.coverage.fraction(),
            notifications: dataflow.notifications.clone(),
            dataflow,
        })
    }

    /// Resolve `observable`, add it to the context's dataflow, and run it.
    ///
    /// The new dataflow is attached under the scope's current observation,
    /// or as a new root when there is none. Only the new part is executed.
    pub fn observe(&self, observable: &Observable, scope: &ContextScope) -> TwinflowResult<ExecutionHandle> {
        let dataflow = self.resolve_dataflow(observable, scope)?;
        if dataflow.is_empty() {
            tracing::warn!(context = %scope.id, observable = %observable, "nothing to run");
            return Ok(ExecutionHandle::completed(Err(
                crate::error::ExecutionError::NothingToRun,
            )));
        }

        let context = self
            .dataflows
            .entry(scope.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Dataflow::empty(scope.scale.clone()))))
            .clone();
        {
            let mut existing = context.lock().expect("dataflow lock poisoned");
            merge::add(&mut existing, dataflow.clone(), scope)?;
            tracing::debug!(
                context = %scope.id,
                actuators = existing.actuator_count(),
                "context dataflow extended"
            );
        }
        Ok(self.executor.run(dataflow, scope)?)
    }

    /// A copy of the context's current dataflow.
    pub fn context_dataflow(&self, context: &str) -> Option<Dataflow> {
        self.dataflows
            .get(context)
            .map(|d| d.value().lock().expect("dataflow lock poisoned").clone())
    }

    /// Canonical text of the context's dataflow; just the header when the
    /// context has none yet.
    pub fn encode(&self, scope: &ContextScope) -> String {
        match self.context_dataflow(&scope.id) {
            Some(dataflow) => self.encoder.encode(&dataflow, scope),
            None => self.encoder.encode(&Dataflow::empty(scope.scale.clone()), scope),
        }
    }

    pub fn encoder(&self) -> &DataflowEncoder {
        &self.encoder
    }
}

/// `scope` moved to the scale its geometry constraint asks for, if any.
fn with_geometry(scope: &ContextScope) -> ResolutionResult<ContextScope> {
    Ok(match scope.constraints.geometry()? {
        Some(scale) => scope.at_scale(scale),
        None => scope.clone(),
    })
}

impl std::fmt::Debug for ResolverService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverService")
            .field("config", &self.config)
            .field("contexts", &self.dataflows.len())
            .finish()
    }
}
