use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::value::reserved;
use crate::value::Value;
use anyhow::Result;

/// Plain service task: creates a job carrying `{_tokenID: token.id}` plus
/// current variables, then parks on `job:<jobKey>` (spec §4.2). Boundary
/// timers/error boundaries are created by the Boundary Manager before this
/// runs (spec requires both to exist before job creation) — enforced by the
/// Execution Processor, not here.
pub struct ServiceTaskExecutor;

impl ElementExecutor for ServiceTaskExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let Some(task_def) = &ctx.element.task_definition else {
            return Ok(ExecutionResult::failure(format!(
                "service task {} has no taskDefinition",
                ctx.element.id
            )));
        };

        let mut vars = ctx.token.variables.clone();
        vars.set_path(reserved::TOKEN_ID, Value::String(ctx.token.id.to_string()));

        Ok(ExecutionResult {
            action: EngineAction::CreateJob {
                task_type: task_def.task_type.clone(),
                retries: task_def.retries,
            },
            variables: Some(vars),
            // waiting_for is filled in by the processor once the job key is
            // known (job creation assigns the key).
            ..ExecutionResult::wait(
                crate::token::WaitingFor::Job(String::new()),
                EngineAction::None,
            )
        })
    }
}
