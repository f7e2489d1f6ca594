use crate::definition::ProcessDefinition;
use crate::events::RuntimeEvent;
use crate::incident::{ErrorBoundarySubscription, Incident};
use crate::instance::{InstanceState, ProcessInstance};
use crate::job::Job;
use crate::message::{keys_match, BufferedMessage, MessageSubscription};
use crate::store::ProcessStore;
use crate::timer::{Timer, TimerState};
use crate::token::Token;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Inner {
    definitions: HashMap<String, ProcessDefinition>,
    instances: HashMap<Uuid, ProcessInstance>,
    tokens: HashMap<Uuid, Token>,
    join_counters: HashMap<(Uuid, String), u32>,
    timers: HashMap<Uuid, Timer>,
    jobs: HashMap<String, Job>,
    subscriptions: HashMap<Uuid, MessageSubscription>,
    buffered_messages: HashMap<Uuid, BufferedMessage>,
    error_boundaries: HashMap<Uuid, Vec<ErrorBoundarySubscription>>,
    incidents: HashMap<Uuid, Vec<Incident>>,
    events: HashMap<Uuid, Vec<(u64, RuntimeEvent)>>,
    event_seq: HashMap<Uuid, u64>,
}

/// In-memory implementation of `ProcessStore`, for tests and the
/// demonstration binary — mirrors the teacher's `MemoryStore`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                definitions: HashMap::new(),
                instances: HashMap::new(),
                tokens: HashMap::new(),
                join_counters: HashMap::new(),
                timers: HashMap::new(),
                jobs: HashMap::new(),
                subscriptions: HashMap::new(),
                buffered_messages: HashMap::new(),
                error_boundaries: HashMap::new(),
                incidents: HashMap::new(),
                events: HashMap::new(),
                event_seq: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessStore for MemoryStore {
    // ── Definitions ──

    async fn save_definition(&self, def: &ProcessDefinition) -> Result<()> {
        let mut w = self.inner.write().await;
        w.definitions.insert(def.key(), def.clone());
        Ok(())
    }

    async fn load_definition(&self, process_key: &str) -> Result<Option<ProcessDefinition>> {
        let r = self.inner.read().await;
        Ok(r.definitions.get(process_key).cloned())
    }

    // ── Instances ──

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()> {
        let mut w = self.inner.write().await;
        w.instances.insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>> {
        let r = self.inner.read().await;
        Ok(r.instances.get(&id).cloned())
    }

    async fn update_instance_state(&self, id: Uuid, state: InstanceState) -> Result<()> {
        let mut w = self.inner.write().await;
        let inst = w
            .instances
            .get_mut(&id)
            .ok_or_else(|| anyhow!("instance not found: {id}"))?;
        inst.state = state;
        inst.touch();
        Ok(())
    }

    // ── Tokens ──

    async fn save_token(&self, token: &Token) -> Result<()> {
        let mut w = self.inner.write().await;
        w.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn load_token(&self, id: Uuid) -> Result<Option<Token>> {
        let r = self.inner.read().await;
        Ok(r.tokens.get(&id).cloned())
    }

    async fn load_tokens_for_instance(&self, instance_id: Uuid) -> Result<Vec<Token>> {
        let r = self.inner.read().await;
        Ok(r.tokens
            .values()
            .filter(|t| t.process_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.tokens.remove(&id);
        Ok(())
    }

    // ── Join barriers ──

    async fn join_arrive(&self, instance_id: Uuid, gateway_id: &str) -> Result<u32> {
        let mut w = self.inner.write().await;
        let counter = w
            .join_counters
            .entry((instance_id, gateway_id.to_string()))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn join_reset(&self, instance_id: Uuid, gateway_id: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.join_counters.remove(&(instance_id, gateway_id.to_string()));
        Ok(())
    }

    // ── Timers ──

    async fn save_timer(&self, timer: &Timer) -> Result<()> {
        let mut w = self.inner.write().await;
        w.timers.insert(timer.id, timer.clone());
        Ok(())
    }

    async fn load_timer(&self, id: Uuid) -> Result<Option<Timer>> {
        let r = self.inner.read().await;
        Ok(r.timers.get(&id).cloned())
    }

    async fn update_timer_state(&self, id: Uuid, state: TimerState) -> Result<()> {
        let mut w = self.inner.write().await;
        if let Some(t) = w.timers.get_mut(&id) {
            t.state = state;
        }
        Ok(())
    }

    async fn load_due_timers(&self, now_ms: i64) -> Result<Vec<Timer>> {
        let r = self.inner.read().await;
        Ok(r.timers
            .values()
            .filter(|t| t.state == TimerState::Scheduled && t.due_at <= now_ms)
            .cloned()
            .collect())
    }

    async fn load_timers_for_token(&self, token_id: Uuid) -> Result<Vec<Timer>> {
        let r = self.inner.read().await;
        Ok(r.timers
            .values()
            .filter(|t| t.token_id == Some(token_id))
            .cloned()
            .collect())
    }

    async fn load_timers_for_instance(&self, instance_id: Uuid) -> Result<Vec<Timer>> {
        let r = self.inner.read().await;
        Ok(r.timers
            .values()
            .filter(|t| t.process_instance_id == Some(instance_id))
            .cloned()
            .collect())
    }

    // ── Jobs ──

    async fn save_job(&self, job: &Job) -> Result<()> {
        let mut w = self.inner.write().await;
        w.jobs.insert(job.key.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, key: &str) -> Result<Option<Job>> {
        let r = self.inner.read().await;
        Ok(r.jobs.get(key).cloned())
    }

    async fn delete_job(&self, key: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.jobs.remove(key);
        Ok(())
    }

    async fn jobs_for_instance(&self, instance_id: Uuid) -> Result<Vec<Job>> {
        let r = self.inner.read().await;
        Ok(r.jobs
            .values()
            .filter(|j| j.process_instance_id == instance_id)
            .cloned()
            .collect())
    }

    // ── Message subscriptions ──

    async fn save_subscription(&self, sub: &MessageSubscription) -> Result<()> {
        let mut w = self.inner.write().await;
        w.subscriptions.insert(sub.id, sub.clone());
        Ok(())
    }

    async fn remove_subscription(&self, id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.subscriptions.remove(&id);
        Ok(())
    }

    async fn find_active_subscriptions(
        &self,
        message_name: &str,
    ) -> Result<Vec<MessageSubscription>> {
        let r = self.inner.read().await;
        Ok(r.subscriptions
            .values()
            .filter(|s| s.is_active && s.message_name == message_name)
            .cloned()
            .collect())
    }

    async fn subscriptions_for_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<MessageSubscription>> {
        let r = self.inner.read().await;
        Ok(r.subscriptions
            .values()
            .filter(|s| s.process_instance_id == Some(instance_id))
            .cloned()
            .collect())
    }

    // ── Buffered messages ──

    async fn save_buffered_message(&self, msg: &BufferedMessage) -> Result<()> {
        let mut w = self.inner.write().await;
        w.buffered_messages.insert(msg.id, msg.clone());
        Ok(())
    }

    async fn take_buffered_message(
        &self,
        name: &str,
        correlation_key: &str,
        now_ms: i64,
    ) -> Result<Option<BufferedMessage>> {
        let mut w = self.inner.write().await;
        let hit_id = w.buffered_messages.values().find_map(|m| {
            if m.expires_at > now_ms && keys_match(&m.name, &m.correlation_key, name, correlation_key) {
                Some(m.id)
            } else {
                None
            }
        });
        Ok(hit_id.and_then(|id| w.buffered_messages.remove(&id)))
    }

    async fn purge_expired_messages(&self, now_ms: i64) -> Result<Vec<Uuid>> {
        let mut w = self.inner.write().await;
        let expired: Vec<Uuid> = w
            .buffered_messages
            .values()
            .filter(|m| m.expires_at <= now_ms)
            .map(|m| m.id)
            .collect();
        for id in &expired {
            w.buffered_messages.remove(id);
        }
        Ok(expired)
    }

    // ── Error boundary registry ──

    async fn register_error_boundary(&self, sub: &ErrorBoundarySubscription) -> Result<()> {
        let mut w = self.inner.write().await;
        w.error_boundaries
            .entry(sub.token_id)
            .or_default()
            .push(sub.clone());
        Ok(())
    }

    async fn remove_error_boundaries_for_token(&self, token_id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.error_boundaries.remove(&token_id);
        Ok(())
    }

    async fn error_boundaries_for_token(
        &self,
        token_id: Uuid,
    ) -> Result<Vec<ErrorBoundarySubscription>> {
        let r = self.inner.read().await;
        Ok(r.error_boundaries.get(&token_id).cloned().unwrap_or_default())
    }

    // ── Incidents ──

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        let mut w = self.inner.write().await;
        w.incidents
            .entry(incident.process_instance_id)
            .or_default()
            .push(incident.clone());
        Ok(())
    }

    async fn load_incidents(&self, instance_id: Uuid) -> Result<Vec<Incident>> {
        let r = self.inner.read().await;
        Ok(r.incidents.get(&instance_id).cloned().unwrap_or_default())
    }

    // ── Event log ──

    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64> {
        let mut w = self.inner.write().await;
        let seq = w.event_seq.entry(instance_id).or_insert(0);
        *seq += 1;
        let seq = *seq;
        w.events
            .entry(instance_id)
            .or_default()
            .push((seq, event.clone()));
        Ok(seq)
    }

    async fn read_events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        let r = self.inner.read().await;
        Ok(r.events
            .get(&instance_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|(seq, _)| *seq > from_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
