use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::token::WaitingFor;
use anyhow::Result;

pub const EXECUTED_PREFIX: &str = "subprocess_executed";

/// Embedded subprocess: forks child tokens at each internal start event
/// scoped to this subprocess id, parks the parent on
/// `subprocess:<elementId>`. Re-entry after completion is guarded by the
/// same execution-context flag as call activity, but — per spec §9's
/// resolution of the source's bug — the flag is cleared if the subprocess
/// is canceled or restarted, so this executor alone cannot tell idempotent
/// re-entry from a legitimate restart; the processor clears the flag at the
/// right points and this executor just trusts it.
pub struct SubProcessExecutor;

impl ElementExecutor for SubProcessExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        if ctx.token.was_executed(EXECUTED_PREFIX, &ctx.element.id) {
            return Ok(ExecutionResult::advance(ctx.element.outgoing.clone()));
        }

        if ctx.definition.subprocess_start_events(&ctx.element.id).is_empty() {
            return Ok(ExecutionResult::failure(format!(
                "subprocess {} has no internal start events",
                ctx.element.id
            )));
        }

        Ok(ExecutionResult {
            action: EngineAction::ForkSubprocess {
                subprocess_id: ctx.element.id.clone(),
            },
            ..ExecutionResult::wait(
                WaitingFor::Subprocess(ctx.element.id.clone()),
                EngineAction::None,
            )
        })
    }
}
