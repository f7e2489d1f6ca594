use crate::instance::Timestamp;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default message buffer TTL (spec §4.5): 300 seconds.
pub const DEFAULT_TTL_MS: i64 = 300_000;

/// A standing subscription for a message/signal an element (or deployment
/// start event) is waiting on (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageSubscription {
    pub id: Uuid,
    pub process_id: String,
    pub process_version: u32,
    /// Start-event id for deployment subscriptions, waiting-element id otherwise.
    pub waiting_element_id: String,
    pub message_name: String,
    pub correlation_key: Option<String>,
    pub is_active: bool,
    pub tenant_id: Option<String>,
    /// Set for subscriptions created by a running token (vs. a deployment
    /// start-event subscription, which has none).
    pub token_id: Option<Uuid>,
    pub process_instance_id: Option<Uuid>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MessageSubscription {
    pub fn is_start_event(&self) -> bool {
        self.token_id.is_none()
    }
}

/// A published message with no matching subscriber yet (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: Uuid,
    pub name: String,
    pub correlation_key: String,
    pub variables: Value,
    pub published_at: Timestamp,
    pub expires_at: Timestamp,
    pub reason: String,
    pub element_id: Option<String>,
}

/// Two buffered-message keys are considered matching per spec §4.5's empty-
/// key special case: an exact `(name, key)` match, or a buffered message
/// with an empty correlation key when the expected key equals the message
/// name itself (anonymous / non-correlated publish).
pub fn keys_match(buffered_name: &str, buffered_key: &str, expected_name: &str, expected_key: &str) -> bool {
    if buffered_name != expected_name {
        return false;
    }
    if buffered_key == expected_key {
        return true;
    }
    buffered_key.is_empty() && expected_key == expected_name
}
