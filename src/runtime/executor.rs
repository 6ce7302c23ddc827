//! Running dataflows against a knowledge graph.
//!
//! [`Executor::run`] hands the dataflow to a worker thread and returns an
//! [`ExecutionHandle`] immediately. The worker computes actuators children
//! first, records every result as an [`Observation`], and links it to the
//! activity that produced it. Cancellation is cooperative: it is checked
//! before and after every actuator, and nothing is written to the twin
//! after it is seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::dataflow::{Actuator, ActuatorKind, Dataflow};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::ActuatorId;
use crate::observable::Observable;
use crate::scope::ContextScope;
use crate::value::Value;

use super::registry::{ComponentRegistry, StepInput};
use super::twin::{ActivityKind, KnowledgeGraph, NodeKey, Observation, Outcome, Relationship};

#[derive(Clone)]
pub struct Executor {
    twin: Arc<dyn KnowledgeGraph>,
    registry: Arc<ComponentRegistry>,
    agent: String,
}

impl Executor {
    /// `agent` is recorded on activities unless the scope names one.
    pub fn new(twin: Arc<dyn KnowledgeGraph>, registry: Arc<ComponentRegistry>, agent: impl Into<String>) -> Self {
        Self {
            twin,
            registry,
            agent: agent.into(),
        }
    }

    pub fn twin(&self) -> &Arc<dyn KnowledgeGraph> {
        &self.twin
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Submit `dataflow` and return without waiting for it.
    pub fn run(&self, dataflow: Dataflow, scope: &ContextScope) -> ExecutionResult<ExecutionHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let result = Arc::new(Mutex::new(None));

        let executor = self.clone();
        let scope = scope.clone();
        let worker_cancelled = Arc::clone(&cancelled);
        let worker_result = Arc::clone(&result);

        let join = std::thread::Builder::new()
            .name(format!("twinflow-run-{}", scope.id))
            .spawn(move || {
                let outcome = executor.execute(&dataflow, &scope, &worker_cancelled);
                *worker_result.lock().expect("result lock poisoned") = Some(outcome);
            })
            .map_err(|e| ExecutionError::Twin {
                message: format!("cannot start execution thread: {e}"),
            })?;

        Ok(ExecutionHandle {
            join: Mutex::new(Some(join)),
            result,
            cancelled,
        })
    }

    /// Run `dataflow` on the calling thread.
    pub fn execute(&self, dataflow: &Dataflow, scope: &ContextScope, cancelled: &AtomicBool) -> ExecutionResult<Observation> {
        if dataflow.is_empty() {
            return Err(ExecutionError::NothingToRun);
        }
        let agent = scope
            .constraints
            .provenance_agent()
            .unwrap_or(self.agent.as_str())
            .to_string();
        let description = match &dataflow.observable {
            Some(obs) => format!("resolve {obs} in {}", scope.display_name()),
            None => format!("run dataflow in {}", scope.display_name()),
        };
        let activity = self.twin.begin_activity(ActivityKind::Resolution, &description, &agent)?;
        tracing::info!(
            context = %scope.id,
            activity,
            agent = %agent,
            actuators = dataflow.actuator_count(),
            "execution started"
        );

        let walked = self.walk(dataflow, &agent, activity, cancelled).and_then(|results| {
            if cancelled.load(Ordering::SeqCst) {
                Err(ExecutionError::Cancelled)
            } else {
                Ok(results)
            }
        });
        match walked {
            Ok(mut results) => {
                let target = dataflow
                    .target
                    .or_else(|| dataflow.actuators.first().map(|a| a.id))
                    .ok_or(ExecutionError::NothingToRun)?;
                let mut observation = results.remove(&target).ok_or(ExecutionError::MissingReference {
                    actuator_id: target.get(),
                    referenced: target.get(),
                })?;
                observation.coverage = dataflow.coverage.clone();
                observation.resolved = observation.resolved && !observation.coverage.is_empty();
                self.twin.record_observation(observation.clone())?;
                self.twin.finish_activity(activity, Outcome::Succeeded)?;
                tracing::info!(
                    context = %scope.id,
                    observation = %observation.id,
                    coverage = observation.coverage.fraction(),
                    "execution finished"
                );
                Ok(observation)
            }
            Err(err) => {
                let outcome = match &err {
                    ExecutionError::Cancelled => Outcome::Cancelled,
                    other => Outcome::Failed(other.to_string()),
                };
                tracing::warn!(context = %scope.id, activity, error = %err, "execution stopped");
                self.twin.finish_activity(activity, outcome)?;
                Err(err)
            }
        }
    }

    /// Post-order over every root; returns each actuator's observation.
    fn walk(
        &self,
        dataflow: &Dataflow,
        agent: &str,
        run: u64,
        cancelled: &AtomicBool,
    ) -> ExecutionResult<HashMap<ActuatorId, Observation>> {
        let mut results: HashMap<ActuatorId, Observation> = HashMap::new();
        let target = dataflow.target;

        for root in &dataflow.actuators {
            let mut stack: Vec<(&Actuator, bool)> = vec![(root, false)];
            while let Some((actuator, expanded)) = stack.pop() {
                if !expanded {
                    stack.push((actuator, true));
                    stack.extend(actuator.children.iter().rev().map(|c| (c, false)));
                    continue;
                }
                if cancelled.load(Ordering::SeqCst) {
                    return Err(ExecutionError::Cancelled);
                }
                let observation = self.compute(actuator, &results, agent, cancelled)?;
                let key = NodeKey::Observation(actuator.id);
                for child in &actuator.children {
                    self.twin
                        .link(&NodeKey::Observation(child.id), Relationship::ChildOf, &key)?;
                }
                if Some(actuator.id) == target {
                    self.twin.link(&NodeKey::Activity(run), Relationship::Generated, &key)?;
                }
                results.insert(actuator.id, observation);
            }
        }
        Ok(results)
    }

    fn compute(
        &self,
        actuator: &Actuator,
        results: &HashMap<ActuatorId, Observation>,
        agent: &str,
        cancelled: &AtomicBool,
    ) -> ExecutionResult<Observation> {
        let mut observation = Observation {
            id: actuator.id,
            observable: actuator.observable.clone(),
            scale: actuator.scale.clone(),
            coverage: actuator.coverage.clone(),
            value: None,
            resolved: false,
        };

        if actuator.kind == ActuatorKind::Reference {
            let referenced = actuator.reference.ok_or(ExecutionError::MissingReference {
                actuator_id: actuator.id.get(),
                referenced: 0,
            })?;
            let original = results.get(&referenced).ok_or(ExecutionError::MissingReference {
                actuator_id: actuator.id.get(),
                referenced: referenced.get(),
            })?;
            observation.value = original.value.clone();
            observation.resolved = original.resolved;
            self.twin.record_observation(observation.clone())?;
            tracing::debug!(actuator = %actuator.id, referenced = %referenced, "reused result");
            return Ok(observation);
        }

        let activity = self.twin.begin_activity(
            ActivityKind::Contextualization,
            &format!("{} {}", actuator.kind, actuator.target_name()),
            agent,
        )?;

        let dependencies: Vec<(String, Option<Value>)> = actuator
            .children
            .iter()
            .map(|c| {
                let value = results.get(&c.id).and_then(|o| o.value.clone());
                (dependency_name(&c.observable), value)
            })
            .collect();

        let mut value: Option<Value> = None;
        for call in &actuator.computation {
            let component = match self.registry.get(&call.name) {
                Some(c) => c,
                None => {
                    let err = ExecutionError::UnknownServiceCall {
                        call: call.name.clone(),
                    };
                    self.twin.finish_activity(activity, Outcome::Failed(err.to_string()))?;
                    return Err(err);
                }
            };
            let input = StepInput {
                observable: &actuator.observable,
                scale: &actuator.scale,
                dependencies: &dependencies,
                previous: value.as_ref(),
            };
            match component.apply(call, &input) {
                Ok(out) => value = out,
                Err(message) => {
                    let err = ExecutionError::StepFailed {
                        actuator_id: actuator.id.get(),
                        call: call.name.clone(),
                        message,
                    };
                    self.twin.finish_activity(activity, Outcome::Failed(err.to_string()))?;
                    return Err(err);
                }
            }
        }

        // A cancel that arrived while the steps ran still keeps the result out.
        if cancelled.load(Ordering::SeqCst) {
            self.twin.finish_activity(activity, Outcome::Cancelled)?;
            return Err(ExecutionError::Cancelled);
        }

        observation.resolved = actuator.kind == ActuatorKind::Observe && !actuator.coverage.is_empty();
        observation.value = value;

        let key = NodeKey::Observation(actuator.id);
        self.twin.record_observation(observation.clone())?;
        self.twin.link(&NodeKey::Activity(activity), Relationship::Generated, &key)?;
        for child in &actuator.children {
            self.twin.link(
                &NodeKey::Activity(activity),
                Relationship::Used,
                &NodeKey::Observation(child.id),
            )?;
        }
        self.twin.finish_activity(activity, Outcome::Succeeded)?;
        tracing::debug!(
            actuator = %actuator.id,
            observable = %actuator.observable,
            steps = actuator.computation.len(),
            "actuator computed"
        );
        Ok(observation)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("agent", &self.agent)
            .field("components", &self.registry.len())
            .finish()
    }
}

/// Name a dependency's value is visible under in computation steps.
fn dependency_name(observable: &Observable) -> String {
    match &observable.stated_name {
        Some(name) => name.clone(),
        None => observable.concept.local_name().to_lowercase(),
    }
}

/// A submitted run.
pub struct ExecutionHandle {
    join: Mutex<Option<JoinHandle<()>>>,
    result: Arc<Mutex<Option<ExecutionResult<Observation>>>>,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionHandle {
    /// Whether the run has stopped, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.result.lock().expect("result lock poisoned").is_some()
            || self
                .join
                .lock()
                .expect("join lock poisoned")
                .as_ref()
                .is_none_or(JoinHandle::is_finished)
    }

    /// Take the result if the run has finished.
    pub fn try_result(&self) -> Option<ExecutionResult<Observation>> {
        self.result.lock().expect("result lock poisoned").take()
    }

    /// Ask the run to stop before its next actuator.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block until the run stops and return its result.
    pub fn wait(self) -> ExecutionResult<Observation> {
        let join = self.join.lock().expect("join lock poisoned").take();
        if let Some(join) = join {
            join.join().map_err(|_| ExecutionError::WorkerPanicked)?;
        }
        self.result
            .lock()
            .expect("result lock poisoned")
            .take()
            .unwrap_or(Err(ExecutionError::WorkerPanicked))
    }

    /// A handle that is already finished with `result`.
    pub fn completed(result: ExecutionResult<Observation>) -> Self {
        Self {
            join: Mutex::new(None),
            result: Arc::new(Mutex::new(Some(result))),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Coverage;
    use crate::model::{CoreFunctor, ServiceCall};
    use crate::runtime::twin::DigitalTwin;
    use crate::scale::Scale;
    use crate::value::Parameters;

    fn actuator(id: u64, concept: &str, computation: Vec<ServiceCall>, children: Vec<Actuator>) -> Actuator {
        let scale = Scale::time(0.0, 1.0).unwrap();
        Actuator {
            id: ActuatorId::new(id).unwrap(),
            observable: concept.parse().unwrap(),
            kind: ActuatorKind::Observe,
            scale: scale.clone(),
            strategy: None,
            computation,
            children,
            coverage: Coverage::full(scale),
            parameters: Parameters::new(),
            reference: None,
        }
    }

    fn dataflow(roots: Vec<Actuator>) -> Dataflow {
        let mut df = Dataflow::empty(Scale::time(0.0, 1.0).unwrap());
        df.target = roots.first().map(|a| a.id);
        df.observable = roots.first().map(|a| a.observable.clone());
        df.actuators = roots;
        df.recompute_coverage();
        df
    }

    fn executor() -> (Arc<DigitalTwin>, Executor) {
        let twin = Arc::new(DigitalTwin::new());
        let executor = Executor::new(twin.clone(), Arc::new(ComponentRegistry::core()), "tester");
        (twin, executor)
    }

    fn constant(v: i64) -> ServiceCall {
        CoreFunctor::ConstantResolver.call().with("value", v)
    }

    #[test]
    fn children_feed_expressions() {
        let (twin, executor) = executor();
        let df = dataflow(vec![actuator(
            1,
            "hydrology:Runoff",
            vec![CoreFunctor::ExpressionResolver
                .call()
                .with("expression", "rainfall * 2")],
            vec![actuator(2, "weather:Rainfall", vec![constant(3)], vec![])],
        )]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let obs = executor.execute(&df, &scope, &AtomicBool::new(false)).unwrap();
        assert_eq!(obs.value, Some(Value::Float(6.0)));
        assert!(obs.resolved);
        assert_eq!(
            twin.related(&NodeKey::Observation(ActuatorId::new(2).unwrap()), Relationship::ChildOf),
            vec![NodeKey::Observation(ActuatorId::new(1).unwrap())]
        );
    }

    #[test]
    fn reference_reuses_result() {
        let (_twin, executor) = executor();
        let mut reference = actuator(3, "weather:Rainfall", vec![], vec![]);
        reference.kind = ActuatorKind::Reference;
        reference.reference = ActuatorId::new(2);
        let df = dataflow(vec![actuator(
            1,
            "hydrology:Runoff",
            vec![CoreFunctor::ExpressionResolver
                .call()
                .with("expression", "rainfall + 1")],
            vec![
                actuator(2, "weather:Rainfall", vec![constant(3)], vec![]),
                actuator(4, "t:Other", vec![], vec![reference]),
            ],
        )]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let obs = executor.execute(&df, &scope, &AtomicBool::new(false)).unwrap();
        assert_eq!(obs.value, Some(Value::Float(4.0)));
        let reused = executor.twin().observation(ActuatorId::new(3).unwrap()).unwrap();
        assert_eq!(reused.value, Some(Value::Int(3)));
    }

    #[test]
    fn unknown_call_fails_the_run() {
        let (twin, executor) = executor();
        let df = dataflow(vec![actuator(1, "t:A", vec![ServiceCall::new("custom.op")], vec![])]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let err = executor.execute(&df, &scope, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownServiceCall { .. }));
        assert!(matches!(twin.activity(1).unwrap().outcome, Outcome::Failed(_)));
    }

    #[test]
    fn cancelled_before_start_writes_no_observation() {
        let (twin, executor) = executor();
        let df = dataflow(vec![actuator(1, "t:A", vec![constant(1)], vec![])]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let err = executor.execute(&df, &scope, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(twin.observations().is_empty());
        assert_eq!(twin.activity(1).unwrap().outcome, Outcome::Cancelled);
    }

    #[test]
    fn empty_dataflow_has_nothing_to_run() {
        let (_twin, executor) = executor();
        let df = Dataflow::empty(Scale::scalar());
        let scope = ContextScope::new("ctx", Scale::scalar());
        let handle = executor.run(df, &scope).unwrap();
        assert!(matches!(handle.wait(), Err(ExecutionError::NothingToRun)));
    }

    #[test]
    fn handle_yields_result() {
        let (_twin, executor) = executor();
        let df = dataflow(vec![actuator(1, "t:A", vec![constant(7)], vec![])]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let handle = executor.run(df, &scope).unwrap();
        let obs = handle.wait().unwrap();
        assert_eq!(obs.value, Some(Value::Int(7)));
    }

    #[test]
    fn completed_handle_is_finished() {
        let handle = ExecutionHandle::completed(Err(ExecutionError::NothingToRun));
        assert!(handle.is_finished());
        assert!(matches!(handle.try_result(), Some(Err(ExecutionError::NothingToRun))));
        assert!(handle.try_result().is_none());
    }

    /// Flips the cancel flag from inside its own step, as a caller would
    /// while the step is running.
    #[derive(Debug)]
    struct CancelsMidStep(Arc<AtomicBool>);

    impl crate::runtime::Contextualizer for CancelsMidStep {
        fn name(&self) -> &str {
            "test.cancel"
        }

        fn apply(&self, _call: &ServiceCall, _input: &StepInput<'_>) -> Result<Option<Value>, String> {
            self.0.store(true, Ordering::SeqCst);
            Ok(Some(Value::Int(1)))
        }
    }

    #[test]
    fn cancel_during_last_step_keeps_result_out_of_twin() {
        let twin = Arc::new(DigitalTwin::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = ComponentRegistry::core();
        registry.register(Arc::new(CancelsMidStep(Arc::clone(&cancelled))));
        let executor = Executor::new(twin.clone(), Arc::new(registry), "tester");

        let df = dataflow(vec![actuator(1, "t:A", vec![ServiceCall::new("test.cancel")], vec![])]);
        let scope = ContextScope::new("ctx", Scale::time(0.0, 1.0).unwrap());
        let err = executor.execute(&df, &scope, &cancelled).unwrap_err();

        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(twin.observations().is_empty());
        assert_eq!(twin.activity(1).unwrap().outcome, Outcome::Cancelled);
        assert_eq!(twin.activity(2).unwrap().outcome, Outcome::Cancelled);
    }
}
