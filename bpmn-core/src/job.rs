use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Activated,
    Completed,
    Failed,
    ErrorThrown,
}

/// A unit of work offered to external workers (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub key: String,
    pub job_type: String,
    pub worker_id: Option<String>,
    pub element_id: String,
    pub process_instance_id: Uuid,
    pub token_id: Uuid,
    pub state: JobState,
    pub retries: u32,
    pub variables: Value,
    pub custom_headers: BTreeMap<String, String>,
}

impl Job {
    pub fn new(
        process_instance_id: Uuid,
        token_id: Uuid,
        element_id: impl Into<String>,
        job_type: impl Into<String>,
        retries: u32,
        variables: Value,
    ) -> Self {
        Self {
            key: Uuid::now_v7().to_string(),
            job_type: job_type.into(),
            worker_id: None,
            element_id: element_id.into(),
            process_instance_id,
            token_id,
            state: JobState::Created,
            retries,
            variables,
            custom_headers: BTreeMap::new(),
        }
    }
}

/// Error code/payload thrown by a job, per the external API surface (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThrownError {
    pub error_code: String,
    pub error_message: Option<String>,
    pub variables: Option<Value>,
}
