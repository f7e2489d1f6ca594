use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use anyhow::Result;

/// User task: creates an addressable work item, parks on `job:<key>`
/// analogue. Completion resumes exactly like a service task (spec §4.2).
pub struct UserTaskExecutor;

impl ElementExecutor for UserTaskExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let task_type = ctx
            .element
            .task_definition
            .as_ref()
            .map(|td| td.task_type.clone())
            .unwrap_or_else(|| "user-task".to_string());

        Ok(ExecutionResult {
            action: EngineAction::CreateUserTask { task_type },
            ..ExecutionResult::wait(
                crate::token::WaitingFor::Job(String::new()),
                EngineAction::None,
            )
        })
    }
}
