//! Message correlator: subscription store, buffered-message store, and the
//! publish/correlate race arbitration between publish-before-subscribe and
//! subscribe-before-publish (spec §4.5).

use crate::events::RuntimeEvent;
use crate::instance::now_ms;
use crate::message::{BufferedMessage, MessageSubscription, DEFAULT_TTL_MS};
use crate::store::ProcessStore;
use crate::value::Value;
use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

pub struct MessageCorrelator {
    store: Arc<dyn ProcessStore>,
}

/// Outcome of a publish attempt.
pub enum PublishOutcome {
    /// An active subscription matched; the waiting token (and, for a
    /// start-event subscription, a fresh instance) should be resumed.
    Correlated {
        subscription: MessageSubscription,
    },
    /// No subscriber was found; the message was buffered.
    Buffered { buffer_id: Uuid },
}

/// Outcome of a subscribe attempt (intermediate catch / receive task).
pub enum SubscribeOutcome {
    /// A buffered message already matched; it was consumed.
    Consumed { message: BufferedMessage },
    /// No buffered message matched; a subscription was created.
    Subscribed { subscription_id: Uuid },
}

impl MessageCorrelator {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self { store }
    }

    /// Publish path (spec §4.5): search active subscriptions for
    /// `messageName == name` and (`correlationKey == key` OR the
    /// subscription is a start-event subscription, where key match is not
    /// required). On no match, buffer with a TTL.
    pub async fn publish(
        &self,
        name: &str,
        correlation_key: &str,
        variables: &Value,
        element_id: Option<&str>,
    ) -> Result<PublishOutcome> {
        let candidates = self.store.find_active_subscriptions(name).await?;

        // Deterministic tie-break when multiple subscriptions match: lowest
        // subscription id wins (spec §5, "chosen deterministically by
        // subscription id order when multiple match").
        let mut matches: Vec<&MessageSubscription> = candidates
            .iter()
            .filter(|s| {
                s.is_start_event()
                    || s.correlation_key.as_deref() == Some(correlation_key)
            })
            .collect();
        matches.sort_by_key(|s| s.id);

        if let Some(sub) = matches.into_iter().next() {
            self.store
                .append_event(
                    sub.process_instance_id.unwrap_or(Uuid::nil()),
                    &RuntimeEvent::MessageCorrelated {
                        token_id: Uuid::nil(),
                        name: name.to_string(),
                        correlation_key: correlation_key.to_string(),
                        via_buffer: false,
                    },
                )
                .await
                .ok();
            return Ok(PublishOutcome::Correlated {
                subscription: sub.clone(),
            });
        }

        let now = now_ms();
        let buffered = BufferedMessage {
            id: Uuid::now_v7(),
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            variables: variables.clone(),
            published_at: now,
            expires_at: now + DEFAULT_TTL_MS,
            reason: "no matching subscription".to_string(),
            element_id: element_id.map(|s| s.to_string()),
        };
        let buffer_id = buffered.id;
        self.store.save_buffered_message(&buffered).await?;
        Ok(PublishOutcome::Buffered { buffer_id })
    }

    /// Subscribe path (spec §4.5): before creating the subscription, look up
    /// a buffered message by `(name, key)`. Exactly one of
    /// {buffered-consume, subscription-creation} happens.
    pub async fn subscribe(
        &self,
        subscription: MessageSubscription,
    ) -> Result<SubscribeOutcome> {
        let now = now_ms();
        if let Some(message) = self
            .store
            .take_buffered_message(&subscription.message_name, subscription.correlation_key.as_deref().unwrap_or(""), now)
            .await?
        {
            return Ok(SubscribeOutcome::Consumed { message });
        }

        let subscription_id = subscription.id;
        self.store.save_subscription(&subscription).await?;
        Ok(SubscribeOutcome::Subscribed { subscription_id })
    }

    pub async fn gc_expired(&self) -> Result<Vec<Uuid>> {
        self.store.purge_expired_messages(now_ms()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;

    fn sub(name: &str, key: &str) -> MessageSubscription {
        MessageSubscription {
            id: Uuid::now_v7(),
            process_id: "p".into(),
            process_version: 1,
            waiting_element_id: "catch1".into(),
            message_name: name.into(),
            correlation_key: Some(key.into()),
            is_active: true,
            tenant_id: None,
            token_id: Some(Uuid::now_v7()),
            process_instance_id: Some(Uuid::now_v7()),
            created_at: now_ms(),
            updated_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn publish_before_subscribe_buffers_then_subscribe_consumes() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let correlator = MessageCorrelator::new(store);

        let mut vars = Value::empty_object();
        vars.set_path("x", Value::from(1.0));
        let outcome = correlator.publish("M", "K", &vars, None).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { .. }));

        let outcome = correlator.subscribe(sub("M", "K")).await.unwrap();
        match outcome {
            SubscribeOutcome::Consumed { message } => {
                assert_eq!(message.variables.get_path("x"), Some(&Value::Number(1.0)));
            }
            _ => panic!("expected consumed"),
        }
    }

    #[tokio::test]
    async fn subscribe_before_publish_then_publish_correlates() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let correlator = MessageCorrelator::new(store);

        let s = sub("M", "K");
        let outcome = correlator.subscribe(s).await.unwrap();
        assert!(matches!(outcome, SubscribeOutcome::Subscribed { .. }));

        let vars = Value::empty_object();
        let outcome = correlator.publish("M", "K", &vars, None).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Correlated { .. }));
    }
}
