use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Active,
    Completed,
    Canceled,
    Failed,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceState::Active)
    }
}

/// A single process instance — the top-level execution context (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub instance_id: Uuid,
    pub process_key: String,
    pub state: InstanceState,
    pub variables: Value,
    /// Dynamic join expected-arrival counts, written by an inclusive-gateway
    /// fork and read by its paired join (see `Element::paired_join_ref`).
    pub join_expected: BTreeMap<String, u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProcessInstance {
    pub fn new(instance_id: Uuid, process_key: impl Into<String>, variables: Value) -> Self {
        let now = now_ms();
        Self {
            instance_id,
            process_key: process_key.into(),
            state: InstanceState::Active,
            variables,
            join_expected: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}
