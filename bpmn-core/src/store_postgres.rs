//! PostgreSQL-backed `ProcessStore` (spec §4.8, "Persistence backends").
//! Each entity keeps its full serialized form in a `data JSONB` column —
//! this crate's `Value`/`Token`/`Timer`/etc. are plain serde structs, not
//! the teacher's hand-packed bytecode VM state — plus the handful of
//! columns the store's query predicates actually need (state, due_at,
//! foreign keys). Mirrors the teacher's JSONB-for-complex-fields approach
//! (`flags`/`counters`/`join_expected` in `PostgresProcessStore`).

use crate::definition::ProcessDefinition;
use crate::events::RuntimeEvent;
use crate::incident::{ErrorBoundarySubscription, Incident};
use crate::instance::{InstanceState, ProcessInstance};
use crate::job::Job;
use crate::message::{keys_match, BufferedMessage, MessageSubscription};
use crate::timer::{Timer, TimerState};
use crate::token::Token;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

/// PostgreSQL-backed implementation of `ProcessStore`.
pub struct PostgresProcessStore {
    pool: sqlx::PgPool,
}

impl PostgresProcessStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run bpmn-core migrations")?;
        Ok(())
    }
}

fn instance_state_tag(state: &InstanceState) -> &'static str {
    match state {
        InstanceState::Active => "active",
        InstanceState::Completed => "completed",
        InstanceState::Canceled => "canceled",
        InstanceState::Failed => "failed",
    }
}

fn timer_state_tag(state: &TimerState) -> &'static str {
    match state {
        TimerState::Scheduled => "scheduled",
        TimerState::Fired => "fired",
        TimerState::Canceled => "canceled",
    }
}

#[async_trait]
impl crate::store::ProcessStore for PostgresProcessStore {
    // ── Process definitions ──

    async fn save_definition(&self, def: &ProcessDefinition) -> Result<()> {
        let data = serde_json::to_value(def)?;
        sqlx::query(
            r#"
            INSERT INTO process_definitions (process_key, process_id, version, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (process_key) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(def.key())
        .bind(&def.process_id)
        .bind(def.version as i32)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_definition(&self, process_key: &str) -> Result<Option<ProcessDefinition>> {
        let row = sqlx::query("SELECT data FROM process_definitions WHERE process_key = $1")
            .bind(process_key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    // ── Instances ──

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()> {
        let data = serde_json::to_value(instance)?;
        sqlx::query(
            r#"
            INSERT INTO process_instances (instance_id, process_key, state, data, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (instance_id) DO UPDATE SET
                process_key = EXCLUDED.process_key,
                state = EXCLUDED.state,
                data = EXCLUDED.data,
                updated_at = now()
            "#,
        )
        .bind(instance.instance_id)
        .bind(&instance.process_key)
        .bind(instance_state_tag(&instance.state))
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>> {
        let row = sqlx::query("SELECT data FROM process_instances WHERE instance_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    async fn update_instance_state(&self, id: Uuid, state: InstanceState) -> Result<()> {
        let Some(mut instance) = self.load_instance(id).await? else {
            return Ok(());
        };
        instance.state = state;
        instance.touch();
        self.save_instance(&instance).await
    }

    // ── Tokens ──

    async fn save_token(&self, token: &Token) -> Result<()> {
        let data = serde_json::to_value(token)?;
        sqlx::query(
            r#"
            INSERT INTO tokens (id, process_instance_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(token.id)
        .bind(token.process_instance_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_token(&self, id: Uuid) -> Result<Option<Token>> {
        let row = sqlx::query("SELECT data FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    async fn load_tokens_for_instance(&self, instance_id: Uuid) -> Result<Vec<Token>> {
        let rows = sqlx::query("SELECT data FROM tokens WHERE process_instance_id = $1")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn delete_token(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Gateway join synchronization ──

    async fn join_arrive(&self, instance_id: Uuid, gateway_id: &str) -> Result<u32> {
        let row = sqlx::query(
            r#"
            INSERT INTO join_counters (instance_id, gateway_id, arrived)
            VALUES ($1, $2, 1)
            ON CONFLICT (instance_id, gateway_id) DO UPDATE SET arrived = join_counters.arrived + 1
            RETURNING arrived
            "#,
        )
        .bind(instance_id)
        .bind(gateway_id)
        .fetch_one(&self.pool)
        .await?;
        let arrived: i32 = row.get("arrived");
        Ok(arrived as u32)
    }

    async fn join_reset(&self, instance_id: Uuid, gateway_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM join_counters WHERE instance_id = $1 AND gateway_id = $2")
            .bind(instance_id)
            .bind(gateway_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Timers ──

    async fn save_timer(&self, timer: &Timer) -> Result<()> {
        let data = serde_json::to_value(timer)?;
        sqlx::query(
            r#"
            INSERT INTO timers (id, token_id, process_instance_id, state, due_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state,
                due_at = EXCLUDED.due_at,
                data = EXCLUDED.data
            "#,
        )
        .bind(timer.id)
        .bind(timer.token_id)
        .bind(timer.process_instance_id)
        .bind(timer_state_tag(&timer.state))
        .bind(timer.due_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_timer(&self, id: Uuid) -> Result<Option<Timer>> {
        let row = sqlx::query("SELECT data FROM timers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    async fn update_timer_state(&self, id: Uuid, state: TimerState) -> Result<()> {
        let Some(mut timer) = self.load_timer(id).await? else {
            return Ok(());
        };
        timer.state = state;
        self.save_timer(&timer).await
    }

    async fn load_due_timers(&self, now_ms: i64) -> Result<Vec<Timer>> {
        let rows = sqlx::query("SELECT data FROM timers WHERE state = 'scheduled' AND due_at <= $1")
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn load_timers_for_token(&self, token_id: Uuid) -> Result<Vec<Timer>> {
        let rows = sqlx::query("SELECT data FROM timers WHERE token_id = $1")
            .bind(token_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn load_timers_for_instance(&self, instance_id: Uuid) -> Result<Vec<Timer>> {
        let rows = sqlx::query("SELECT data FROM timers WHERE process_instance_id = $1")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    // ── Jobs ──

    async fn save_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_value(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (key, process_instance_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(&job.key)
        .bind(job.process_instance_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_job(&self, key: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT data FROM jobs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let data: serde_json::Value = row.get("data");
                Ok(Some(serde_json::from_value(data)?))
            }
        }
    }

    async fn delete_job(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn jobs_for_instance(&self, instance_id: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM jobs WHERE process_instance_id = $1")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    // ── Message subscriptions ──

    async fn save_subscription(&self, sub: &MessageSubscription) -> Result<()> {
        let data = serde_json::to_value(sub)?;
        sqlx::query(
            r#"
            INSERT INTO message_subscriptions
                (id, process_instance_id, message_name, is_active, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                is_active = EXCLUDED.is_active,
                data = EXCLUDED.data
            "#,
        )
        .bind(sub.id)
        .bind(sub.process_instance_id)
        .bind(&sub.message_name)
        .bind(sub.is_active)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_subscription(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM message_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_active_subscriptions(&self, message_name: &str) -> Result<Vec<MessageSubscription>> {
        let rows = sqlx::query(
            "SELECT data FROM message_subscriptions WHERE is_active = true AND message_name = $1",
        )
        .bind(message_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn subscriptions_for_instance(&self, instance_id: Uuid) -> Result<Vec<MessageSubscription>> {
        let rows = sqlx::query("SELECT data FROM message_subscriptions WHERE process_instance_id = $1")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    // ── Buffered messages ──

    async fn save_buffered_message(&self, msg: &BufferedMessage) -> Result<()> {
        let data = serde_json::to_value(msg)?;
        sqlx::query(
            r#"
            INSERT INTO buffered_messages (id, name, correlation_key, expires_at, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(msg.id)
        .bind(&msg.name)
        .bind(&msg.correlation_key)
        .bind(msg.expires_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_buffered_message(
        &self,
        name: &str,
        correlation_key: &str,
        now_ms: i64,
    ) -> Result<Option<BufferedMessage>> {
        let rows = sqlx::query("SELECT data FROM buffered_messages WHERE name = $1 AND expires_at > $2")
            .bind(name)
            .bind(now_ms)
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let data: serde_json::Value = row.get("data");
            let msg: BufferedMessage = serde_json::from_value(data)?;
            if keys_match(&msg.name, &msg.correlation_key, name, correlation_key) {
                sqlx::query("DELETE FROM buffered_messages WHERE id = $1")
                    .bind(msg.id)
                    .execute(&self.pool)
                    .await?;
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    async fn purge_expired_messages(&self, now_ms: i64) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "DELETE FROM buffered_messages WHERE expires_at <= $1 RETURNING id",
        )
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    // ── Error boundary registry ──

    async fn register_error_boundary(&self, sub: &ErrorBoundarySubscription) -> Result<()> {
        let data = serde_json::to_value(sub)?;
        sqlx::query(
            r#"
            INSERT INTO error_boundaries (token_id, element_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_id, element_id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(sub.token_id)
        .bind(&sub.element_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_error_boundaries_for_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM error_boundaries WHERE token_id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn error_boundaries_for_token(&self, token_id: Uuid) -> Result<Vec<ErrorBoundarySubscription>> {
        let rows = sqlx::query("SELECT data FROM error_boundaries WHERE token_id = $1")
            .bind(token_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    // ── Incidents ──

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        let data = serde_json::to_value(incident)?;
        sqlx::query(
            r#"
            INSERT INTO incidents (id, process_instance_id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(incident.id)
        .bind(incident.process_instance_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_incidents(&self, instance_id: Uuid) -> Result<Vec<Incident>> {
        let rows = sqlx::query("SELECT data FROM incidents WHERE process_instance_id = $1")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: serde_json::Value = row.get("data");
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    // ── Event log ──

    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64> {
        let data = serde_json::to_value(event)?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT COALESCE(MAX(seq), 0) + 1 AS next_seq FROM events WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&mut *tx)
        .await?;
        let seq: i64 = row.get("next_seq");
        sqlx::query("INSERT INTO events (instance_id, seq, data) VALUES ($1, $2, $3)")
            .bind(instance_id)
            .bind(seq)
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(seq as u64)
    }

    async fn read_events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        let rows = sqlx::query(
            "SELECT seq, data FROM events WHERE instance_id = $1 AND seq > $2 ORDER BY seq ASC",
        )
        .bind(instance_id)
        .bind(from_seq as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let seq: i64 = row.get("seq");
                let data: serde_json::Value = row.get("data");
                Ok((seq as u64, serde_json::from_value(data)?))
            })
            .collect()
    }
}
