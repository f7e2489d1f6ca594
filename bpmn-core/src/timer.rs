use crate::instance::Timestamp;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerType {
    Start,
    Event,
    Boundary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    Scheduled,
    Fired,
    Canceled,
}

/// Exactly one of these is set on a `Timer` (spec §3 invariant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TimerSpec {
    Duration(String),
    Date(String),
    Cycle(String),
}

/// A scheduled timer (spec §3). `process_instance_id` is empty-equivalent
/// (`None`) for a deployment-time start timer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timer {
    pub id: Uuid,
    pub element_id: String,
    /// Parent token (boundary) or waiter token (event). Empty for start timers.
    pub token_id: Option<Uuid>,
    pub process_instance_id: Option<Uuid>,
    pub timer_type: TimerType,
    pub state: TimerState,
    pub due_at: Timestamp,
    pub spec: TimerSpec,
    pub process_context: TimerProcessContext,
    pub variables: BTreeMap<String, Value>,
    pub attached_to_ref: Option<String>,
    pub cancel_activity: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerProcessContext {
    pub process_id: String,
    pub version: u32,
    pub component_source: String,
}

pub const VAR_TIME_CYCLE: &str = "time_cycle";
pub const VAR_REPEAT_COUNT: &str = "repeat_count";
pub const VAR_CURRENT_ITERATION: &str = "current_iteration";
pub const VAR_ANCHOR: &str = "_anchor";

/// Extract the one timer spec variant an event definition carries (spec §3
/// invariant: exactly one of duration/date/cycle).
pub fn spec_from_event_definition(
    def: &crate::definition::EventDefinition,
) -> Result<TimerSpec, String> {
    if let Some(d) = &def.time_duration {
        return Ok(TimerSpec::Duration(d.clone()));
    }
    if let Some(d) = &def.time_date {
        return Ok(TimerSpec::Date(d.clone()));
    }
    if let Some(c) = &def.time_cycle {
        return Ok(TimerSpec::Cycle(c.clone()));
    }
    Err("timer event definition has no duration/date/cycle".to_string())
}

impl Timer {
    pub fn new(
        element_id: impl Into<String>,
        token_id: Option<Uuid>,
        process_instance_id: Option<Uuid>,
        timer_type: TimerType,
        due_at: Timestamp,
        spec: TimerSpec,
        process_context: TimerProcessContext,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            element_id: element_id.into(),
            token_id,
            process_instance_id,
            timer_type,
            state: TimerState::Scheduled,
            due_at,
            spec,
            process_context,
            variables: BTreeMap::new(),
            attached_to_ref: None,
            cancel_activity: None,
        }
    }
}
