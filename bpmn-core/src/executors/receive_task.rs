use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::expr::evaluate_to_literal_string;
use crate::token::WaitingFor;
use crate::value::reserved;
use anyhow::Result;

/// Receive task: same behavior as an intermediate catch message event. A
/// re-execution whose token already carries `_correlatedBy == "message"`
/// treats the correlation as already consumed and advances (spec §4.2).
pub struct ReceiveTaskExecutor;

impl ElementExecutor for ReceiveTaskExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        if ctx
            .token
            .variables
            .get_path(reserved::CORRELATED_BY)
            .and_then(|v| v.as_str())
            == Some("message")
        {
            return Ok(ExecutionResult::advance(ctx.element.outgoing.clone()));
        }

        let Some(name) = &ctx.element.message_name else {
            return Ok(ExecutionResult::failure(format!(
                "receive task {} has no messageName",
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

        Ok(ExecutionResult::wait(
            WaitingFor::Message(name.clone()),
            EngineAction::AwaitMessage {
                name: name.clone(),
                correlation_key: key,
            },
        ))
    }
}
