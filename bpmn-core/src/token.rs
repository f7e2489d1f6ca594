use crate::instance::{now_ms, Timestamp};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    Active,
    Waiting,
    Completed,
    Canceled,
    Failed,
}

impl TokenState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenState::Completed | TokenState::Canceled | TokenState::Failed
        )
    }
}

/// The tag carried by a waiting token (spec §6, "Waiting tags").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitingFor {
    Timer(String),
    Job(String),
    Message(String),
    Signal(String),
    CallActivity(Uuid),
    Subprocess(String),
    CompetingEvents,
}

impl WaitingFor {
    /// String-tag rendering per spec §6 (`timer:<id>`, `job:<id>`, ...).
    pub fn as_tag(&self) -> String {
        match self {
            WaitingFor::Timer(id) => format!("timer:{id}"),
            WaitingFor::Job(id) => format!("job:{id}"),
            WaitingFor::Message(name) => format!("message:{name}"),
            WaitingFor::Signal(name) => format!("signal:{name}"),
            WaitingFor::CallActivity(id) => format!("call_activity:{id}"),
            WaitingFor::Subprocess(id) => format!("subprocess:{id}"),
            WaitingFor::CompetingEvents => "competing_events".to_string(),
        }
    }
}

/// A token — the unit of execution, parked at one element (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub process_instance_id: Uuid,
    pub process_key: String,
    pub current_element_id: String,
    pub state: TokenState,
    pub waiting_for: Option<WaitingFor>,
    pub variables: Value,
    pub parent_token_id: Option<Uuid>,
    pub sub_process_id: Option<String>,
    pub boundary_timer_ids: Vec<Uuid>,
    /// Event-based gateway race participants (spec §4.3): the timer ids and
    /// subscription ids competing to resume this token. Cleared, with the
    /// losers canceled, the moment one of them wins.
    pub competing_timer_ids: Vec<Uuid>,
    pub competing_subscription_ids: Vec<Uuid>,
    /// Element-keyed scratch map used to mark "already executed here", for
    /// idempotent re-entry on call-activity / subprocess resumption.
    pub execution_context: BTreeMap<String, bool>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Token {
    pub fn new(
        process_instance_id: Uuid,
        process_key: impl Into<String>,
        current_element_id: impl Into<String>,
        variables: Value,
        parent_token_id: Option<Uuid>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7(),
            process_instance_id,
            process_key: process_key.into(),
            current_element_id: current_element_id.into(),
            state: TokenState::Active,
            waiting_for: None,
            variables,
            parent_token_id,
            sub_process_id: None,
            boundary_timer_ids: Vec::new(),
            competing_timer_ids: Vec::new(),
            competing_subscription_ids: Vec::new(),
            execution_context: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    pub fn park(&mut self, waiting_for: WaitingFor) {
        self.state = TokenState::Waiting;
        self.waiting_for = Some(waiting_for);
        self.touch();
    }

    pub fn resume(&mut self) {
        self.state = TokenState::Active;
        self.waiting_for = None;
        self.touch();
    }

    pub fn mark_executed(&mut self, prefix: &str, element_id: &str) {
        self.execution_context
            .insert(format!("{prefix}:{element_id}"), true);
    }

    pub fn was_executed(&self, prefix: &str, element_id: &str) -> bool {
        self.execution_context
            .get(&format!("{prefix}:{element_id}"))
            .copied()
            .unwrap_or(false)
    }

    pub fn clear_executed(&mut self, prefix: &str, element_id: &str) {
        self.execution_context
            .remove(&format!("{prefix}:{element_id}"));
    }

    /// Clone this token as a fork sibling at `target_element_id`: fresh id,
    /// deep-copied variables, same `parent_token_id`.
    pub fn fork_to(&self, target_element_id: &str) -> Token {
        let mut clone = self.clone();
        clone.id = Uuid::now_v7();
        clone.current_element_id = target_element_id.to_string();
        clone.state = TokenState::Active;
        clone.waiting_for = None;
        clone.boundary_timer_ids = Vec::new();
        clone.competing_timer_ids = Vec::new();
        clone.competing_subscription_ids = Vec::new();
        let now = now_ms();
        clone.created_at = now;
        clone.updated_at = now;
        clone
    }
}
