use super::{ElementExecutor, ExecutionResult, ExecutorContext};
use crate::definition::EventDefinitionType;
use crate::token::WaitingFor;
use anyhow::Result;

/// An element with more incoming flows than outgoing is treated as a join;
/// everything else is a fork. Matches how BPMN tooling typically
/// distinguishes the two uses of the same gateway type.
fn is_join(element: &crate::definition::Element) -> bool {
    element.incoming.len() > 1 && element.outgoing.len() <= 1
}

/// Exclusive gateway: fork selects exactly one true flow (default if none);
/// join is a plain pass-through with no synchronization (only one branch is
/// ever active at a time for an XOR split).
pub struct ExclusiveGatewayExecutor;

impl ElementExecutor for ExclusiveGatewayExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::advance(ctx.element.outgoing.clone());
        if !is_join(ctx.element) {
            result.needs_condition_eval = true;
            result.select_all_true = false;
        }
        Ok(result)
    }
}

/// Inclusive gateway: fork selects all true flows (default when none are
/// true); join requires synchronization over the dynamic expected count
/// recorded by the paired fork (spec §9 resolves the source's bug of never
/// evaluating conditions — this engine always evaluates them).
pub struct InclusiveGatewayExecutor;

impl ElementExecutor for InclusiveGatewayExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::advance(ctx.element.outgoing.clone());
        if !is_join(ctx.element) {
            result.needs_condition_eval = true;
            result.select_all_true = true;
        }
        Ok(result)
    }
}

/// Parallel gateway: fork takes every outgoing flow unconditionally (the
/// processor's generic multi-flow forking handles the cloning); join
/// synchronizes on the static incoming-flow count.
pub struct ParallelGatewayExecutor;

impl ElementExecutor for ParallelGatewayExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        Ok(ExecutionResult::advance(ctx.element.outgoing.clone()))
    }
}

/// Event-based gateway: parks on `competing_events` and asks the processor
/// to create one subscription per outgoing target event. Event type is
/// inferred from the target's first `event_definitions[].type` (spec §9 —
/// never from id substrings).
pub struct EventBasedGatewayExecutor;

impl ElementExecutor for EventBasedGatewayExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        // Validate every target resolves and carries a recognized event
        // definition; the processor does the actual subscription fan-out
        // since it alone can look up each target element.
        for target_id in &ctx.element.outgoing {
            let Some(flow) = ctx.definition.get(target_id) else {
                return Ok(ExecutionResult::failure(format!(
                    "event-based gateway outgoing flow not found: {target_id}"
                )));
            };
            let Some(target) = flow.target_ref.as_ref().and_then(|t| ctx.definition.get(t)) else {
                return Ok(ExecutionResult::failure(format!(
                    "event-based gateway target not found for flow: {target_id}"
                )));
            };
            match target.primary_event_kind() {
                Some(EventDefinitionType::Timer)
                | Some(EventDefinitionType::Message)
                | Some(EventDefinitionType::Signal) => {}
                _ => {
                    return Ok(ExecutionResult::failure(format!(
                        "event-based gateway target {} has no recognized event definition",
                        target.id
                    )));
                }
            }
        }
        Ok(ExecutionResult::wait(
            WaitingFor::CompetingEvents,
            super::EngineAction::None,
        ))
    }
}
