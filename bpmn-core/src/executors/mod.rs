//! Element executors: one per BPMN element kind, pure functions of
//! `(token, element) -> ExecutionResult` (spec §4.2). Side effects
//! (persistence, timer creation, job creation, subscription, publish) are
//! requested via `EngineAction` and carried out by the Execution Processor
//! (`crate::processor`), never by the executor itself.

mod call_activity;
mod catch_event;
mod gateways;
mod http_connector;
mod receive_task;
mod script_task;
mod send_task;
mod service_task;
mod start_end;
mod subprocess;
mod throw_event;
mod user_task;

pub use http_connector::HttpRequestConfig;

use crate::definition::{Element, ProcessDefinition, HTTP_CONNECTOR_TYPES};
use crate::expr::ExpressionEvaluator;
use crate::token::{Token, WaitingFor};
use crate::value::Value;
use anyhow::Result;

/// Everything an executor needs to decide what to do next. Read-only.
pub struct ExecutorContext<'a> {
    pub element: &'a Element,
    pub token: &'a Token,
    pub definition: &'a ProcessDefinition,
    pub evaluator: &'a dyn ExpressionEvaluator,
}

/// A side effect the Execution Processor must carry out on the executor's
/// behalf (spec §4.1, "side effects go through the Engine").
#[derive(Debug, Clone)]
pub enum EngineAction {
    None,
    CreateJob {
        task_type: String,
        retries: u32,
    },
    CreateHttpJob {
        config: HttpRequestConfig,
        outputs: Vec<crate::definition::IoMappingEntry>,
    },
    CreateUserTask {
        task_type: String,
    },
    ScheduleTimer {
        timer_type: crate::timer::TimerType,
        spec: crate::timer::TimerSpec,
    },
    /// Consult buffered messages, else create a subscription (spec §4.5).
    AwaitMessage {
        name: String,
        correlation_key: String,
    },
    PublishMessage {
        name: String,
        correlation_key: String,
        variables: Value,
    },
    AwaitSignal {
        name: String,
    },
    PublishSignal {
        name: String,
        variables: Value,
    },
    StartCallActivity {
        process_id: String,
        variables: Value,
    },
    ForkSubprocess {
        subprocess_id: String,
    },
    ThrowError {
        error_code: String,
        message: Option<String>,
        variables: Option<Value>,
    },
    Terminate,
}

/// What an executor decided, before the processor applies gateway/condition
/// semantics and side effects.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    /// Outgoing sequence-flow ids to consider. For gateways, the processor
    /// still applies condition evaluation / fork semantics on top of this.
    pub next_elements: Vec<String>,
    pub completed: bool,
    pub waiting_for: Option<WaitingFor>,
    pub action: EngineAction,
    /// Variables merged into the token on completion, if any.
    pub variables: Option<Value>,
    /// True when this gateway kind requires the processor to evaluate
    /// per-flow conditions (exclusive/inclusive fork); false for plain
    /// pass-through (joins, parallel fork, tasks, events).
    pub needs_condition_eval: bool,
    /// True when this gateway kind selects ALL true flows rather than
    /// exactly one (inclusive vs. exclusive).
    pub select_all_true: bool,
}

impl ExecutionResult {
    pub fn advance(next_elements: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            next_elements,
            completed: false,
            waiting_for: None,
            action: EngineAction::None,
            variables: None,
            needs_condition_eval: false,
            select_all_true: false,
        }
    }

    pub fn complete() -> Self {
        Self {
            success: true,
            error: None,
            next_elements: Vec::new(),
            completed: true,
            waiting_for: None,
            action: EngineAction::None,
            variables: None,
            needs_condition_eval: false,
            select_all_true: false,
        }
    }

    pub fn wait(waiting_for: WaitingFor, action: EngineAction) -> Self {
        Self {
            success: true,
            error: None,
            next_elements: Vec::new(),
            completed: false,
            waiting_for: Some(waiting_for),
            action,
            variables: None,
            needs_condition_eval: false,
            select_all_true: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            next_elements: Vec::new(),
            completed: false,
            waiting_for: None,
            action: EngineAction::None,
            variables: None,
            needs_condition_eval: false,
            select_all_true: false,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// The closed set of element executors, discriminated by element type
/// (spec §9 design note: a closed variant set, not open runtime dispatch).
pub trait ElementExecutor: Send + Sync {
    fn execute(&self, ctx: &ExecutorContext<'_>) -> Result<ExecutionResult>;
}

/// Maps BPMN element types to executors; selects the HTTP-connector variant
/// of a service task when the task-definition type matches a known
/// connector id (spec §4.1).
pub struct ExecutorRegistry {
    start_event: start_end::StartEventExecutor,
    end_event: start_end::EndEventExecutor,
    exclusive_gateway: gateways::ExclusiveGatewayExecutor,
    inclusive_gateway: gateways::InclusiveGatewayExecutor,
    parallel_gateway: gateways::ParallelGatewayExecutor,
    event_based_gateway: gateways::EventBasedGatewayExecutor,
    service_task: service_task::ServiceTaskExecutor,
    http_connector: http_connector::HttpConnectorExecutor,
    user_task: user_task::UserTaskExecutor,
    script_task: script_task::ScriptTaskExecutor,
    call_activity: call_activity::CallActivityExecutor,
    subprocess: subprocess::SubProcessExecutor,
    catch_event: catch_event::IntermediateCatchEventExecutor,
    throw_event: throw_event::ThrowEventExecutor,
    send_task: send_task::SendTaskExecutor,
    receive_task: receive_task::ReceiveTaskExecutor,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            start_event: start_end::StartEventExecutor,
            end_event: start_end::EndEventExecutor,
            exclusive_gateway: gateways::ExclusiveGatewayExecutor,
            inclusive_gateway: gateways::InclusiveGatewayExecutor,
            parallel_gateway: gateways::ParallelGatewayExecutor,
            event_based_gateway: gateways::EventBasedGatewayExecutor,
            service_task: service_task::ServiceTaskExecutor,
            http_connector: http_connector::HttpConnectorExecutor,
            user_task: user_task::UserTaskExecutor,
            script_task: script_task::ScriptTaskExecutor,
            call_activity: call_activity::CallActivityExecutor,
            subprocess: subprocess::SubProcessExecutor,
            catch_event: catch_event::IntermediateCatchEventExecutor,
            throw_event: throw_event::ThrowEventExecutor,
            send_task: send_task::SendTaskExecutor,
            receive_task: receive_task::ReceiveTaskExecutor,
        }
    }

    /// Total function from element type (+ task-definition type for service
    /// tasks) to executor. Returns `None` only if no variant matches, which
    /// the Engine turns into `EngineError::NoExecutor`.
    pub fn resolve(&self, element: &Element) -> Option<&dyn ElementExecutor> {
        use crate::definition::ElementType::*;
        match element.element_type {
            StartEvent => Some(&self.start_event),
            EndEvent => {
                if element.is_terminate {
                    Some(&self.throw_event)
                } else {
                    Some(&self.end_event)
                }
            }
            SequenceFlow => None,
            ExclusiveGateway => Some(&self.exclusive_gateway),
            InclusiveGateway => Some(&self.inclusive_gateway),
            ParallelGateway => Some(&self.parallel_gateway),
            EventBasedGateway => Some(&self.event_based_gateway),
            ServiceTask => {
                if is_http_connector(element) {
                    Some(&self.http_connector)
                } else {
                    Some(&self.service_task)
                }
            }
            UserTask => Some(&self.user_task),
            ScriptTask => Some(&self.script_task),
            SendTask => Some(&self.send_task),
            ReceiveTask => Some(&self.receive_task),
            CallActivity => Some(&self.call_activity),
            SubProcess => Some(&self.subprocess),
            IntermediateCatchEvent => Some(&self.catch_event),
            IntermediateThrowEvent => Some(&self.throw_event),
            BoundaryEvent => None, // never executed directly (spec §4.2)
        }
    }
}

fn is_http_connector(element: &Element) -> bool {
    element
        .task_definition
        .as_ref()
        .map(|td| HTTP_CONNECTOR_TYPES.contains(&td.task_type.as_str()))
        .unwrap_or(false)
}
