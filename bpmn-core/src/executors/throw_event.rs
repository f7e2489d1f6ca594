use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::definition::EventDefinitionType;
use crate::expr::evaluate_to_literal_string;
use anyhow::Result;

/// Intermediate throw event / terminating end event: publishes a message,
/// throws a BPMN error, or terminates the instance (spec §4.2).
pub struct ThrowEventExecutor;

impl ElementExecutor for ThrowEventExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        if ctx.element.is_terminate {
            return Ok(ExecutionResult {
                completed: true,
                action: EngineAction::Terminate,
                ..ExecutionResult::complete()
            });
        }

        if let Some(code) = &ctx.element.throw_error_code {
            return Ok(ExecutionResult {
                action: EngineAction::ThrowError {
                    error_code: code.clone(),
                    message: None,
                    variables: None,
                },
                ..ExecutionResult::advance(Vec::new())
            });
        }

        if let Some(def) = ctx.element.event_definitions.first() {
            if def.kind == EventDefinitionType::Signal {
                if let Some(name) = &def.signal_name {
                    return Ok(ExecutionResult {
                        action: EngineAction::PublishSignal {
                            name: name.clone(),
                            variables: ctx.token.variables.clone(),
                        },
                        ..ExecutionResult::advance(ctx.element.outgoing.clone())
                    });
                }
            }
        }

        let Some(name) = &ctx.element.message_name else {
            // No definition at all: pass-through.
            return Ok(ExecutionResult::advance(ctx.element.outgoing.clone()));
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
