//! Boundary Manager (spec §4.4): creates timer and error boundary
//! subscriptions on activity entry, removes them on activity exit, and
//! resolves boundary firing semantics (interrupting vs. non-interrupting
//! timers, error-code matching).

use crate::definition::{Element, ElementType, EventDefinitionType, ProcessDefinition};
use crate::events::RuntimeEvent;
use crate::expr::ExpressionEvaluator;
use crate::incident::ErrorBoundarySubscription;
use crate::instance::now_ms;
use crate::store::ProcessStore;
use crate::timer::{Timer, TimerProcessContext, TimerType};
use crate::timer_wheel::due_at_for_spec;
use crate::token::Token;
use anyhow::{anyhow, Result};
use std::sync::Arc;

pub struct BoundaryManager {
    store: Arc<dyn ProcessStore>,
}

/// What firing a boundary timer resolves to (spec §4.4, "Boundary firing
/// semantics").
pub enum BoundaryFireOutcome {
    /// Parent token is terminal already; the timer is an orphan no-op.
    Orphan,
    /// Interrupting: caller must cancel the parent's wait, move it to
    /// `boundary_element_id`, and execute it.
    Interrupt { boundary_element_id: String },
    /// Non-interrupting: caller must spawn a sibling token at
    /// `boundary_element_id` inheriting the parent's variables.
    Spawn { boundary_element_id: String },
}

impl BoundaryManager {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self { store }
    }

    /// Create timer and error boundary subscriptions for every
    /// `boundaryEvent` attached to `activity` (spec §4.4). Called once, on
    /// activity entry, before the activity's own job/wait is created.
    pub async fn enter_activity(
        &self,
        definition: &ProcessDefinition,
        activity: &Element,
        parent_token: &mut Token,
        evaluator: &dyn ExpressionEvaluator,
    ) -> Result<()> {
        for boundary in definition.boundary_events_for(&activity.id) {
            let Some(def) = boundary.event_definitions.first() else {
                continue;
            };
            match def.kind {
                EventDefinitionType::Timer => {
                    let spec = crate::timer::spec_from_event_definition(def)
                        .map_err(|e| anyhow!(e))?;
                    let due_at = due_at_for_spec(&spec, now_ms())?;
                    let timer = Timer::new(
                        boundary.id.clone(),
                        Some(parent_token.id),
                        Some(parent_token.process_instance_id),
                        TimerType::Boundary,
                        due_at,
                        spec,
                        TimerProcessContext {
                            process_id: definition.process_id.clone(),
                            version: definition.version,
                            component_source: "boundary_manager".into(),
                        },
                    );
                    let mut timer = timer;
                    timer.cancel_activity = Some(boundary.cancel_activity.unwrap_or(true));
                    timer.attached_to_ref = Some(activity.id.clone());
                    self.store.save_timer(&timer).await?;
                    self.store
                        .append_event(
                            parent_token.process_instance_id,
                            &RuntimeEvent::TimerScheduled {
                                timer_id: timer.id,
                                element_id: boundary.id.clone(),
                                due_at: timer.due_at,
                            },
                        )
                        .await?;
                    parent_token.boundary_timer_ids.push(timer.id);
                }
                EventDefinitionType::Error => {
                    let error_code = def.error_code.clone().unwrap_or_default();
                    let sub = ErrorBoundarySubscription {
                        token_id: parent_token.id,
                        element_id: boundary.id.clone(),
                        attached_to_ref: activity.id.clone(),
                        error_code,
                        error_name: def.error_name.clone(),
                        cancel_activity: boundary.cancel_activity.unwrap_or(true),
                        outgoing_flows: boundary.outgoing.clone(),
                    };
                    self.store.register_error_boundary(&sub).await?;
                }
                _ => {
                    let _ = evaluator; // reserved for future event-type boundaries
                }
            }
        }
        Ok(())
    }

    /// Cancel all boundary timers and remove all error-boundary
    /// subscriptions for a token whose activity is being exited — via
    /// normal completion, cancellation, interruption, or failure (spec
    /// §4.4). Best-effort: a single timer's cancel failing does not stop
    /// the rest from being cleaned up (spec §9 redesign note).
    pub async fn exit_activity(&self, token: &mut Token) -> Result<()> {
        let mut errors = Vec::new();
        for timer_id in token.boundary_timer_ids.drain(..).collect::<Vec<_>>() {
            if let Err(e) = self
                .store
                .update_timer_state(timer_id, crate::timer::TimerState::Canceled)
                .await
            {
                errors.push(e.to_string());
            }
        }
        token.boundary_timer_ids.clear();
        self.store.remove_error_boundaries_for_token(token.id).await?;
        if !errors.is_empty() {
            tracing::warn!(token_id = %token.id, errors = ?errors, "boundary timer cancellation had partial failures");
        }
        Ok(())
    }

    /// Resolve what a fired boundary timer should do, given the parent
    /// token's current (pre-fire) state.
    pub fn fire_timer(&self, parent: &Token, timer: &Timer) -> BoundaryFireOutcome {
        if parent.state.is_terminal() {
            return BoundaryFireOutcome::Orphan;
        }
        let element_id = timer.element_id.clone();
        if timer.cancel_activity.unwrap_or(true) {
            BoundaryFireOutcome::Interrupt {
                boundary_element_id: element_id,
            }
        } else {
            BoundaryFireOutcome::Spawn {
                boundary_element_id: element_id,
            }
        }
    }

    /// Error-boundary lookup on a thrown error (spec §4.4): exact-string
    /// match against `errorCode`; first registration wins on duplicates.
    pub async fn find_error_boundary(
        &self,
        token_id: uuid::Uuid,
        error_code: &str,
    ) -> Result<Option<ErrorBoundarySubscription>> {
        let subs = self.store.error_boundaries_for_token(token_id).await?;
        Ok(subs.into_iter().find(|s| s.error_code == error_code))
    }

    /// True if `element_id` names a boundary event (used by callers deciding
    /// whether a currently-waiting token's element needs boundary lookups).
    pub fn is_boundary_event(definition: &ProcessDefinition, element_id: &str) -> bool {
        definition
            .get(element_id)
            .map(|e| e.element_type == ElementType::BoundaryEvent)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Element, EventDefinition};
    use crate::store_memory::MemoryStore;
    use crate::value::Value;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn definition_with_boundary() -> ProcessDefinition {
        let mut elements = BTreeMap::new();
        let mut task = Element::new("task1", ElementType::ServiceTask);
        task.outgoing = vec!["flow1".into()];
        elements.insert(task.id.clone(), task);

        let mut boundary = Element::new("boundary1", ElementType::BoundaryEvent);
        boundary.attached_to_ref = Some("task1".into());
        boundary.cancel_activity = Some(true);
        let mut def = EventDefinition::none();
        def.kind = EventDefinitionType::Timer;
        def.time_duration = Some("PT1S".into());
        boundary.event_definitions = vec![def];
        boundary.outgoing = vec!["flow2".into()];
        elements.insert(boundary.id.clone(), boundary);

        ProcessDefinition {
            process_id: "p".into(),
            version: 1,
            elements,
        }
    }

    #[tokio::test]
    async fn enter_activity_creates_boundary_timer() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let manager = BoundaryManager::new(store.clone());
        let def = definition_with_boundary();
        let activity = def.get("task1").unwrap();
        let evaluator = crate::expr::LiteralEvaluator::default();
        let mut token = Token::new(Uuid::now_v7(), "p:v1", "task1", Value::empty_object(), None);

        manager
            .enter_activity(&def, activity, &mut token, &evaluator)
            .await
            .unwrap();

        assert_eq!(token.boundary_timer_ids.len(), 1);
        let timers = store.load_timers_for_token(token.id).await.unwrap();
        assert_eq!(timers.len(), 1);
    }

    #[tokio::test]
    async fn exit_activity_cancels_timers_and_errors() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let manager = BoundaryManager::new(store.clone());
        let def = definition_with_boundary();
        let activity = def.get("task1").unwrap();
        let evaluator = crate::expr::LiteralEvaluator::default();
        let mut token = Token::new(Uuid::now_v7(), "p:v1", "task1", Value::empty_object(), None);

        manager
            .enter_activity(&def, activity, &mut token, &evaluator)
            .await
            .unwrap();
        manager.exit_activity(&mut token).await.unwrap();

        assert!(token.boundary_timer_ids.is_empty());
        let timers = store.load_timers_for_token(token.id).await.unwrap();
        assert!(timers
            .iter()
            .all(|t| t.state == crate::timer::TimerState::Canceled));
    }
}
