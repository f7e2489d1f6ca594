use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::expr::evaluate_to_literal_string;
use anyhow::Result;

/// Send task: instantly publishes and advances — fire-and-forget with
/// respect to correlation semantics (spec §4.2).
pub struct SendTaskExecutor;

impl ElementExecutor for SendTaskExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let Some(name) = &ctx.element.message_name else {
            return Ok(ExecutionResult::failure(format!(
                "send task {} has no messageName",
                ctx.element.id
            )));
        };
        let key_expr = ctx.element.correlation_key_expr.as_deref().unwrap_or("");
        let key = if key_expr.is_empty() {
            String::new()
        } else {
            match evaluate_to_literal_string(ctx.evaluator, key_expr, &ctx.token.variables) {
                Ok(k) => k,
                Err(e) => return Ok(ExecutionResult::failure(e.to_string())),
            }
        };

        Ok(ExecutionResult {
            action: EngineAction::PublishMessage {
                name: name.clone(),
                correlation_key: key,
                variables: ctx.token.variables.clone(),
            },
            ..ExecutionResult::advance(ctx.element.outgoing.clone())
        })
    }
}
