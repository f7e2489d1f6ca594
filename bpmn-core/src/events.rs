use crate::instance::Timestamp;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events — the durable audit trail for every process instance,
/// mirroring the teacher's append-only `RuntimeEvent` log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RuntimeEvent {
    InstanceStarted {
        instance_id: Uuid,
        process_key: String,
    },
    TokenCreated {
        token_id: Uuid,
        element_id: String,
        parent_token_id: Option<Uuid>,
    },
    TokenAdvanced {
        token_id: Uuid,
        from_element: String,
        to_element: String,
    },
    TokenForked {
        token_id: Uuid,
        children: Vec<Uuid>,
        targets: Vec<String>,
    },
    TokenParked {
        token_id: Uuid,
        waiting_for: String,
    },
    TokenResumed {
        token_id: Uuid,
        element_id: String,
    },
    TokenCompleted {
        token_id: Uuid,
        element_id: String,
    },
    TokenFailed {
        token_id: Uuid,
        element_id: String,
        message: String,
    },
    GatewayJoinArrived {
        gateway_id: String,
        token_id: Uuid,
        arrived: u32,
        expected: u32,
    },
    GatewayJoinReleased {
        gateway_id: String,
        released_token_id: Uuid,
    },
    JobCreated {
        job_key: String,
        job_type: String,
        element_id: String,
    },
    JobCompleted {
        job_key: String,
    },
    JobFailed {
        job_key: String,
        retries_remaining: u32,
    },
    JobErrorThrown {
        job_key: String,
        error_code: String,
    },
    TimerScheduled {
        timer_id: Uuid,
        element_id: String,
        due_at: Timestamp,
    },
    TimerCanceled {
        timer_id: Uuid,
    },
    TimerFired {
        timer_id: Uuid,
        element_id: String,
    },
    BoundaryTimerInterrupted {
        timer_id: Uuid,
        token_id: Uuid,
        boundary_element_id: String,
    },
    BoundaryTimerSpawned {
        timer_id: Uuid,
        parent_token_id: Uuid,
        spawned_token_id: Uuid,
        boundary_element_id: String,
    },
    TimerCycleIteration {
        timer_id: Uuid,
        iteration: u32,
    },
    MessagePublished {
        name: String,
        correlation_key: String,
    },
    MessageBuffered {
        buffer_id: Uuid,
        name: String,
        correlation_key: String,
    },
    MessageCorrelated {
        token_id: Uuid,
        name: String,
        correlation_key: String,
        via_buffer: bool,
    },
    MessageSubscriptionCreated {
        subscription_id: Uuid,
        name: String,
    },
    MessageExpired {
        buffer_id: Uuid,
    },
    ErrorBoundaryMatched {
        token_id: Uuid,
        error_code: String,
        boundary_element_id: String,
    },
    IncidentCreated {
        incident_id: Uuid,
        element_id: String,
        job_key: Option<String>,
    },
    InstanceCompleted {
        instance_id: Uuid,
    },
    InstanceCanceled {
        instance_id: Uuid,
        reason: String,
    },
    LateSignalIgnored {
        description: String,
    },
    Variables {
        token_id: Uuid,
        merged: Value,
    },
}
