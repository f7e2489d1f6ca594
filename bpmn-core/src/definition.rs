use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A BPMN element's discriminant, as carried in the process definition JSON
/// (spec §6, "Process Definition JSON"). Every element is keyed by id with
/// at least `type` plus type-specific fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ElementType {
    StartEvent,
    EndEvent,
    SequenceFlow,
    ExclusiveGateway,
    InclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
    ServiceTask,
    UserTask,
    ScriptTask,
    SendTask,
    ReceiveTask,
    CallActivity,
    SubProcess,
    IntermediateCatchEvent,
    IntermediateThrowEvent,
    BoundaryEvent,
}

/// Discriminant of an event's trigger, taken from `event_definitions[].type`
/// (spec §9 redesign flag: event type is inferred from this, never from
/// element-id substrings).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventDefinitionType {
    None,
    Timer,
    Message,
    Signal,
    Error,
    Terminate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(rename = "type")]
    pub kind: EventDefinitionType,
    /// Timer: one of duration / date / cycle (ISO-8601, spec §6).
    pub time_duration: Option<String>,
    pub time_date: Option<String>,
    pub time_cycle: Option<String>,
    /// Message: message name and FEEL-or-literal correlation key expression.
    pub message_name: Option<String>,
    pub correlation_key: Option<String>,
    /// Signal: signal name.
    pub signal_name: Option<String>,
    /// Error: error code/name this definition refers to.
    pub error_code: Option<String>,
    pub error_name: Option<String>,
}

impl EventDefinition {
    pub fn none() -> Self {
        Self {
            kind: EventDefinitionType::None,
            time_duration: None,
            time_date: None,
            time_cycle: None,
            message_name: None,
            correlation_key: None,
            signal_name: None,
            error_code: None,
            error_name: None,
        }
    }
}

/// Task-definition extension element (service/user task), carrying the
/// worker-visible task type and retry budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_retries() -> u32 {
    3
}

/// One `source -> target` mapping entry in an ioMapping list (HTTP connector
/// inputs/outputs, spec §4.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IoMappingEntry {
    pub source: String,
    pub target: String,
}

/// HTTP-connector config, populated from extension elements on a service
/// task whose task-definition type matches a known connector id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConnectorSpec {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    pub body: Option<String>,
    pub auth: Option<String>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<IoMappingEntry>,
    #[serde(default)]
    pub outputs: Vec<IoMappingEntry>,
}

/// Known HTTP-connector task-definition type ids. The Executor Registry
/// selects the HTTP-connector variant of a service task when a task
/// definition's type matches one of these.
pub const HTTP_CONNECTOR_TYPES: &[&str] = &["io.camunda:http-json", "http-connector", "rest-call"];

/// A BPMN element. Fields not meaningful to `element_type` are left `None`/
/// empty — the definition JSON is sparse per element kind, matching spec §3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub name: Option<String>,
    #[serde(default)]
    pub incoming: Vec<String>,
    #[serde(default)]
    pub outgoing: Vec<String>,

    // sequenceFlow
    pub target_ref: Option<String>,
    pub condition: Option<String>,
    #[serde(default)]
    pub is_default: bool,

    // boundary event
    pub attached_to_ref: Option<String>,
    pub cancel_activity: Option<bool>,

    // subprocess child scoping
    pub parent_scope: Option<String>,

    // events (start/intermediate/boundary/end)
    #[serde(default)]
    pub event_definitions: Vec<EventDefinition>,

    // tasks
    pub task_definition: Option<TaskDefinition>,
    pub http_connector: Option<HttpConnectorSpec>,
    pub script: Option<String>,

    // call activity
    pub called_element_process_id: Option<String>,

    /// Inclusive-gateway fork -> its paired join element id. BPMN does not
    /// structurally link a fork to "its" join; this engine requires the
    /// link to be explicit so the join knows its dynamic expected arrival
    /// count (see DESIGN.md, inclusive-join open question).
    pub paired_join_ref: Option<String>,

    // send/throw/end (terminate) — message publish config
    pub message_name: Option<String>,
    pub correlation_key_expr: Option<String>,
    #[serde(default)]
    pub is_terminate: bool,
    pub throw_error_code: Option<String>,

    #[serde(default)]
    pub extension_elements: BTreeMap<String, String>,
}

impl Element {
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            name: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            target_ref: None,
            condition: None,
            is_default: false,
            attached_to_ref: None,
            cancel_activity: None,
            parent_scope: None,
            event_definitions: Vec::new(),
            task_definition: None,
            http_connector: None,
            script: None,
            called_element_process_id: None,
            paired_join_ref: None,
            message_name: None,
            correlation_key_expr: None,
            is_terminate: false,
            throw_error_code: None,
            extension_elements: BTreeMap::new(),
        }
    }

    /// The first event definition's kind, or `None` for a plain element.
    /// Spec §9 mandates this as the sole source of event-type inference.
    pub fn primary_event_kind(&self) -> Option<&EventDefinitionType> {
        self.event_definitions.first().map(|d| &d.kind)
    }
}

/// A versioned process definition, keyed by `processId:v<version>`
/// (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub process_id: String,
    pub version: u32,
    pub elements: BTreeMap<String, Element>,
}

impl ProcessDefinition {
    pub fn process_key(process_id: &str, version: u32) -> String {
        format!("{process_id}:v{version}")
    }

    pub fn key(&self) -> String {
        Self::process_key(&self.process_id, self.version)
    }

    pub fn get(&self, element_id: &str) -> Option<&Element> {
        self.elements.get(element_id)
    }

    /// Eligible no-trigger start events (`none` event definition, or empty
    /// event_definitions). Triggered starts (message/timer/signal) are
    /// registered as deployment-time subscriptions, not created here.
    pub fn none_start_events(&self) -> Vec<&Element> {
        self.elements
            .values()
            .filter(|e| {
                e.element_type == ElementType::StartEvent
                    && e.parent_scope.is_none()
                    && matches!(
                        e.primary_event_kind(),
                        None | Some(EventDefinitionType::None)
                    )
            })
            .collect()
    }

    /// Triggered top-level start events (message/timer/signal), used to
    /// register deployment-time subscriptions.
    pub fn triggered_start_events(&self) -> Vec<&Element> {
        self.elements
            .values()
            .filter(|e| {
                e.element_type == ElementType::StartEvent
                    && e.parent_scope.is_none()
                    && matches!(
                        e.primary_event_kind(),
                        Some(EventDefinitionType::Timer)
                            | Some(EventDefinitionType::Message)
                            | Some(EventDefinitionType::Signal)
                    )
            })
            .collect()
    }

    /// Start events scoped to a given subprocess/parent element id.
    pub fn subprocess_start_events(&self, parent_scope: &str) -> Vec<&Element> {
        self.elements
            .values()
            .filter(|e| {
                e.element_type == ElementType::StartEvent
                    && e.parent_scope.as_deref() == Some(parent_scope)
            })
            .collect()
    }

    /// Boundary events attached to a given activity id.
    pub fn boundary_events_for(&self, activity_id: &str) -> Vec<&Element> {
        self.elements
            .values()
            .filter(|e| {
                e.element_type == ElementType::BoundaryEvent
                    && e.attached_to_ref.as_deref() == Some(activity_id)
            })
            .collect()
    }
}
