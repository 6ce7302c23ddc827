//! Splicing a freshly compiled dataflow into a context's running one.

use crate::error::{DataflowError, DataflowResult};
use crate::scope::ContextScope;

use super::{Actuator, Dataflow};

/// Attach `new` to `existing`.
///
/// Without a current observation in `scope`, the new roots are appended as
/// roots. Otherwise they become children of the actuator whose id is the
/// scope's current observation, and coverage is recomputed from there up to
/// the root. A hook point that is not in `existing` is a caller bug and
/// leaves `existing` untouched.
pub fn add(existing: &mut Dataflow, new: Dataflow, scope: &ContextScope) -> DataflowResult<()> {
    let Dataflow {
        actuators,
        requirements,
        target,
        observable,
        notifications,
        ..
    } = new;

    match scope.current_observation {
        None => {
            tracing::debug!(context = %scope.id, roots = actuators.len(), "attaching at root");
            existing.actuators.extend(actuators);
        }
        Some(hook) => {
            let path = hook_path(existing, hook).ok_or_else(|| DataflowError::HookNotFound {
                actuator_id: hook.get(),
                context: scope.id.clone(),
            })?;
            tracing::debug!(
                context = %scope.id,
                hook = %hook,
                depth = path.len(),
                roots = actuators.len(),
                "attaching under hook point"
            );
            let (first, rest) = path.split_first().ok_or(DataflowError::HookNotFound {
                actuator_id: hook.get(),
                context: scope.id.clone(),
            })?;
            attach(&mut existing.actuators[*first], rest, actuators);
        }
    }

    existing.requirements.extend(requirements);
    existing.notifications.extend(notifications);
    if existing.target.is_none() {
        existing.target = target;
        existing.observable = observable;
    }
    existing.recompute_coverage();
    Ok(())
}

/// Child indices leading from the roots to the actuator with id `hook`.
fn hook_path(dataflow: &Dataflow, hook: crate::id::ActuatorId) -> Option<Vec<usize>> {
    let mut stack: Vec<(Vec<usize>, &Actuator)> = dataflow
        .actuators
        .iter()
        .enumerate()
        .rev()
        .map(|(i, a)| (vec![i], a))
        .collect();
    while let Some((path, actuator)) = stack.pop() {
        if actuator.id == hook {
            return Some(path);
        }
        for (i, child) in actuator.children.iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(i);
            stack.push((child_path, child));
        }
    }
    None
}

/// Descend `path`, append `roots` at its end, and widen coverage on the way back up.
fn attach(actuator: &mut Actuator, path: &[usize], roots: Vec<Actuator>) {
    match path.split_first() {
        None => {
            for root in roots {
                actuator.coverage = actuator.coverage.merge(&root.coverage);
                actuator.children.push(root);
            }
        }
        Some((&i, rest)) => {
            attach(&mut actuator.children[i], rest, roots);
            let child = actuator.children[i].coverage.clone();
            actuator.coverage = actuator.coverage.merge(&child);
        }
    }
}
