use super::{ElementExecutor, ExecutionResult, ExecutorContext};
use anyhow::Result;

/// Script task: evaluates an inline expression against the token's
/// variables and merges the result under the script's declared output
/// binding (spec §4.2). Real script-language runtimes are out of scope
/// (spec §1, "plug-in language runtimes for scripts" non-goal) — the
/// "script" here is the same evaluator-expression surface the engine
/// already exposes for conditions and correlation keys.
pub struct ScriptTaskExecutor;

impl ElementExecutor for ScriptTaskExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let Some(script) = &ctx.element.script else {
            return Ok(ExecutionResult::failure(format!(
                "script task {} has no script",
                ctx.element.id
            )));
        };

        let value = match ctx.evaluator.evaluate(script, &ctx.token.variables) {
            Ok(v) => v,
            Err(e) => {
                return Ok(ExecutionResult::failure(format!(
                    "script task {} failed: {e}",
                    ctx.element.id
                )))
            }
        };

        let mut vars = ctx.token.variables.clone();
        let result_key = ctx
            .element
            .extension_elements
            .get("resultVariable")
            .cloned()
            .unwrap_or_else(|| "result".to_string());
        vars.set_path(&result_key, value);

        Ok(ExecutionResult::advance(ctx.element.outgoing.clone()).with_variables(vars))
    }
}
