use crate::instance::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentStatus {
    Open,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentType {
    UnhandledBpmnError,
    JobFailureExhausted,
    ExecutionError,
}

/// An operator-visible record of an unrecoverable error (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub incident_type: IncidentType,
    pub process_instance_id: Uuid,
    pub element_id: String,
    pub job_key: Option<String>,
    pub error_code: Option<String>,
    pub message: String,
    pub status: IncidentStatus,
    pub created_at: Timestamp,
}

/// In-process registration of an error boundary for one activity entry
/// (spec §3). Removed on activity exit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBoundarySubscription {
    pub token_id: Uuid,
    pub element_id: String,
    pub attached_to_ref: String,
    pub error_code: String,
    pub error_name: Option<String>,
    pub cancel_activity: bool,
    pub outgoing_flows: Vec<String>,
}
