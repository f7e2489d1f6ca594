use super::{ElementExecutor, EngineAction, ExecutionResult, ExecutorContext};
use crate::definition::EventDefinitionType;
use crate::expr::evaluate_to_literal_string;
use crate::timer::{TimerSpec, TimerType};
use crate::token::WaitingFor;
use anyhow::Result;

/// Intermediate catch event: behavior discriminated by the first event
/// definition (spec §4.2). No definition at all is a pass-through.
pub struct IntermediateCatchEventExecutor;

impl ElementExecutor for IntermediateCatchEventExecutor {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult> {
        let Some(def) = ctx.element.event_definitions.first() else {
            return Ok(ExecutionResult::advance(ctx.element.outgoing.clone()));
        };

        match def.kind {
            EventDefinitionType::Timer => {
                let spec = match crate::timer::spec_from_event_definition(def) {
                    Ok(s) => s,
                    Err(e) => return Ok(ExecutionResult::failure(e)),
                };
                Ok(ExecutionResult {
                    action: EngineAction::ScheduleTimer {
                        timer_type: TimerType::Event,
                        spec,
                    },
                    ..ExecutionResult::wait(
                        WaitingFor::Timer(ctx.element.id.clone()),
                        EngineAction::None,
                    )
                })
            }
            EventDefinitionType::Message => {
                let Some(name) = &def.message_name else {
                    return Ok(ExecutionResult::failure(format!(
                        "intermediate catch {} missing messageName",
                        ctx.element.id
                    )));
                };
                let key_expr = def.correlation_key.as_deref().unwrap_or("");
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
            EventDefinitionType::Signal => {
                let Some(name) = &def.signal_name else {
                    return Ok(ExecutionResult::failure(format!(
                        "intermediate catch {} missing signalName",
                        ctx.element.id
                    )));
                };
                Ok(ExecutionResult::wait(
                    WaitingFor::Signal(name.clone()),
                    EngineAction::AwaitSignal { name: name.clone() },
                ))
            }
            EventDefinitionType::None | EventDefinitionType::Error | EventDefinitionType::Terminate => {
                Ok(ExecutionResult::advance(ctx.element.outgoing.clone()))
            }
        }
    }
}
