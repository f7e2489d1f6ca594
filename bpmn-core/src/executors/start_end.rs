use super::{ElementExecutor, ExecutionResult, ExecutorContext};
use anyhow::Result;

/// `none` start event: pass-through to outgoing flows. Triggered variants
/// (message/timer/signal) never reach the engine as a running token — they
/// are deployment-time subscriptions that create a fresh instance when they
/// fire (spec §4.2).
pub struct StartEventExecutor;

impl ElementExecutor for StartEventExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        Ok(ExecutionResult::advance(ctx.element.outgoing.clone()))
    }
}

/// `none` end event: completes the token.
pub struct EndEventExecutor;

impl ElementExecutor for EndEventExecutor {
    fn execute(&self, _ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        Ok(ExecutionResult::complete())
    }
}
