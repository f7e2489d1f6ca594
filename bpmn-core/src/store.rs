use crate::definition::ProcessDefinition;
use crate::events::RuntimeEvent;
use crate::incident::{ErrorBoundarySubscription, Incident};
use crate::instance::{InstanceState, ProcessInstance};
use crate::job::Job;
use crate::message::{BufferedMessage, MessageSubscription};
use crate::timer::{Timer, TimerState};
use crate::token::Token;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for all engine state. The Engine and executors operate
/// exclusively through this trait, enabling pluggable backends (`MemoryStore`
/// for tests/demo, `PostgresProcessStore` for production) — mirroring the
/// teacher's `ProcessStore` split.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    // ── Process definitions ──

    async fn save_definition(&self, def: &ProcessDefinition) -> Result<()>;
    async fn load_definition(&self, process_key: &str) -> Result<Option<ProcessDefinition>>;

    // ── Instances ──

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()>;
    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>>;
    async fn update_instance_state(&self, id: Uuid, state: InstanceState) -> Result<()>;

    // ── Tokens ──

    async fn save_token(&self, token: &Token) -> Result<()>;
    async fn load_token(&self, id: Uuid) -> Result<Option<Token>>;
    async fn load_tokens_for_instance(&self, instance_id: Uuid) -> Result<Vec<Token>>;
    async fn delete_token(&self, id: Uuid) -> Result<()>;

    // ── Gateway join synchronization ──

    /// Increment the arrived count for a `(instance, gateway)` join barrier
    /// and return the new count.
    async fn join_arrive(&self, instance_id: Uuid, gateway_id: &str) -> Result<u32>;
    async fn join_reset(&self, instance_id: Uuid, gateway_id: &str) -> Result<()>;

    // ── Timers ──

    async fn save_timer(&self, timer: &Timer) -> Result<()>;
    async fn load_timer(&self, id: Uuid) -> Result<Option<Timer>>;
    async fn update_timer_state(&self, id: Uuid, state: TimerState) -> Result<()>;
    async fn load_due_timers(&self, now_ms: i64) -> Result<Vec<Timer>>;
    async fn load_timers_for_token(&self, token_id: Uuid) -> Result<Vec<Timer>>;
    async fn load_timers_for_instance(&self, instance_id: Uuid) -> Result<Vec<Timer>>;

    // ── Jobs ──

    async fn save_job(&self, job: &Job) -> Result<()>;
    async fn load_job(&self, key: &str) -> Result<Option<Job>>;
    async fn delete_job(&self, key: &str) -> Result<()>;
    async fn jobs_for_instance(&self, instance_id: Uuid) -> Result<Vec<Job>>;

    // ── Message subscriptions ──

    async fn save_subscription(&self, sub: &MessageSubscription) -> Result<()>;
    async fn remove_subscription(&self, id: Uuid) -> Result<()>;
    async fn find_active_subscriptions(
        &self,
        message_name: &str,
    ) -> Result<Vec<MessageSubscription>>;
    async fn subscriptions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<MessageSubscription>>;

    // ── Buffered messages ──

    async fn save_buffered_message(&self, msg: &BufferedMessage) -> Result<()>;
    async fn take_buffered_message(
        &self,
        name: &str,
        correlation_key: &str,
        now_ms: i64,
    ) -> Result<Option<BufferedMessage>>;
    async fn purge_expired_messages(&self, now_ms: i64) -> Result<Vec<Uuid>>;

    // ── Error boundary registry ──

    async fn register_error_boundary(&self, sub: &ErrorBoundarySubscription) -> Result<()>;
    async fn remove_error_boundaries_for_token(&self, token_id: Uuid) -> Result<()>;
    async fn error_boundaries_for_token(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<ErrorBoundarySubscription>>;

    // ── Incidents ──

    async fn save_incident(&self, incident: &Incident) -> Result<()>;
    async fn load_incidents(&self, instance_id: Uuid) -> Result<Vec<Incident>>;

    // ── Event log (append-only) ──

    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64>;
    async fn read_events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>>;
}
