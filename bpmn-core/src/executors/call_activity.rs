use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::token::WaitingFor;
use anyhow::Result;

const EXECUTED_PREFIX: &str = "call_activity_executed";

/// Call activity: starts a child instance of `calledElement.process_id` and
/// parks on `call_activity:<childInstanceId>`. A re-execution that finds the
/// `call_activity_executed:<elementId>` flag already set skips straight to
/// outgoing flows (spec §4.2, idempotent re-entry).
pub struct CallActivityExecutor;

impl ElementExecutor for CallActivityExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        if ctx.token.was_executed(EXECUTED_PREFIX, &ctx.element.id) {
            return Ok(ExecutionResult::advance(ctx.element.outgoing.clone()));
        }

        let Some(process_id) = &ctx.element.called_element_process_id else {
            return Ok(ExecutionResult::failure(format!(
                "call activity {} has no calledElement.process_id",
                ctx.element.id
            )));
        };

        // The process id itself may be a FEEL expression.
        let resolved_process_id = match ctx.evaluator.evaluate(process_id, &ctx.token.variables) {
            Ok(v) => v.to_string(),
            Err(e) => {
                return Ok(ExecutionResult::failure(format!(
                    "call activity {} failed to resolve process id: {e}",
                    ctx.element.id
                )))
            }
        };

        Ok(ExecutionResult {
            action: EngineAction::StartCallActivity {
                process_id: resolved_process_id,
                variables: ctx.token.variables.clone(),
            },
            ..ExecutionResult::wait(
                // Placeholder instance id; the processor rewrites this to
                // the real child instance id once the child is started.
                WaitingFor::CallActivity(uuid::Uuid::nil()),
                EngineAction::None,
            )
        })
    }
}
