//! `Engine` is the top-level facade that wires together the store, the
//! expression evaluator, the HTTP connector client, and the execution
//! processor. Server handlers delegate to this; it is the only type in the
//! crate that converts the internal `anyhow::Result` plumbing into the
//! public `EngineError`/`EngineResult` boundary (spec §7).

use crate::definition::{EventDefinitionType, ProcessDefinition};
use crate::error::{EngineError, EngineResult};
use crate::events::RuntimeEvent;
use crate::expr::ExpressionEvaluator;
use crate::http_client::HttpClient;
use crate::incident::Incident;
use crate::instance::{InstanceState, ProcessInstance};
use crate::message::MessageSubscription;
use crate::processor::ExecutionProcessor;
use crate::store::ProcessStore;
use crate::timer::{spec_from_event_definition, Timer, TimerProcessContext, TimerType};
use crate::timer_wheel::due_at_for_spec;
use crate::token::Token;
use crate::value::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of a process instance returned by `Engine::inspect`.
#[derive(Debug, Clone)]
pub struct InstanceInspection {
    pub instance_id: Uuid,
    pub process_key: String,
    pub state: InstanceState,
    pub tokens: Vec<Token>,
    pub incidents: Vec<Incident>,
}

pub struct Engine {
    store: Arc<dyn ProcessStore>,
    processor: ExecutionProcessor,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        let processor = ExecutionProcessor::new(store.clone(), evaluator, http_client);
        Self { store, processor }
    }

    /// Deploy a process definition: persist it, and register deployment-time
    /// subscriptions for its triggered (message/timer/signal) start events
    /// (spec §4.1, "Deployment").
    pub async fn deploy(&self, definition: ProcessDefinition) -> EngineResult<()> {
        for start in definition.triggered_start_events() {
            let Some(def) = start.event_definitions.first() else {
                continue;
            };
            match def.kind {
                EventDefinitionType::Timer => {
                    let spec = spec_from_event_definition(def).map_err(|e| {
                        EngineError::ExecutionError {
                            element: start.id.clone(),
                            message: e,
                        }
                    })?;
                    let due_at = due_at_for_spec(&spec, crate::instance::now_ms())?;
                    let timer = Timer::new(
                        start.id.clone(),
                        None,
                        None,
                        TimerType::Start,
                        due_at,
                        spec,
                        TimerProcessContext {
                            process_id: definition.process_id.clone(),
                            version: definition.version,
                            component_source: "engine_deploy".into(),
                        },
                    );
                    self.store.save_timer(&timer).await?;
                }
                EventDefinitionType::Message => {
                    let name = def.message_name.clone().unwrap_or_default();
                    let subscription = MessageSubscription {
                        id: Uuid::now_v7(),
                        process_id: definition.process_id.clone(),
                        process_version: definition.version,
                        waiting_element_id: start.id.clone(),
                        message_name: name,
                        correlation_key: None,
                        is_active: true,
                        tenant_id: None,
                        token_id: None,
                        process_instance_id: None,
                        created_at: crate::instance::now_ms(),
                        updated_at: crate::instance::now_ms(),
                    };
                    self.store.save_subscription(&subscription).await?;
                }
                EventDefinitionType::Signal => {
                    let name = def.signal_name.clone().unwrap_or_default();
                    let subscription = MessageSubscription {
                        id: Uuid::now_v7(),
                        process_id: definition.process_id.clone(),
                        process_version: definition.version,
                        waiting_element_id: start.id.clone(),
                        message_name: crate::processor::signal_channel(&name),
                        correlation_key: None,
                        is_active: true,
                        tenant_id: None,
                        token_id: None,
                        process_instance_id: None,
                        created_at: crate::instance::now_ms(),
                        updated_at: crate::instance::now_ms(),
                    };
                    self.store.save_subscription(&subscription).await?;
                }
                _ => {}
            }
        }
        self.store.save_definition(&definition).await?;
        Ok(())
    }

    /// Start a new instance of `process_id`'s latest-deployed `version` at
    /// its none-start-event(s), and run it to its first park/completion.
    pub async fn start_instance(
        &self,
        process_id: &str,
        version: u32,
        variables: Value,
    ) -> EngineResult<Uuid> {
        let process_key = ProcessDefinition::process_key(process_id, version);
        let definition = self
            .store
            .load_definition(&process_key)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(process_key.clone()))?;

        let start = definition
            .none_start_events()
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NoStartEvent(process_key.clone()))?;

        let instance = ProcessInstance::new(Uuid::now_v7(), definition.key(), variables.clone());
        self.store.save_instance(&instance).await?;
        self.store
            .append_event(
                instance.instance_id,
                &RuntimeEvent::InstanceStarted {
                    instance_id: instance.instance_id,
                    process_key: instance.process_key.clone(),
                },
            )
            .await?;

        let token = Token::new(
            instance.instance_id,
            definition.key(),
            start.id.clone(),
            variables,
            None,
        );
        self.store.save_token(&token).await?;
        self.processor.execute_token(token.id).await?;
        Ok(instance.instance_id)
    }

    /// Drive a single token until it parks or its instance completes. Used
    /// by callers that already hold a token id (e.g. recovering after a
    /// crash and replaying `Active` tokens).
    pub async fn execute_token(&self, token_id: Uuid) -> EngineResult<()> {
        self.processor.execute_token(token_id).await?;
        Ok(())
    }

    /// Cancel a running instance: every non-terminal token is canceled, its
    /// boundary subscriptions are torn down, and the instance is marked
    /// `Canceled` (spec §4.7).
    pub async fn cancel_instance(&self, instance_id: Uuid) -> EngineResult<()> {
        let mut instance = self
            .store
            .load_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        if instance.state.is_terminal() {
            return Ok(());
        }
        self.processor.cancel_instance_tokens(instance_id).await?;
        instance.state = InstanceState::Canceled;
        instance.touch();
        self.store.save_instance(&instance).await?;
        self.store
            .append_event(instance_id, &RuntimeEvent::InstanceCompleted { instance_id })
            .await?;
        Ok(())
    }

    pub async fn handle_timer_fired(&self, timer_id: Uuid) -> EngineResult<()> {
        self.processor.handle_timer_fired(timer_id).await?;
        Ok(())
    }

    pub async fn handle_job_completed(&self, job_key: &str, variables: Value) -> EngineResult<()> {
        self.processor.handle_job_completed(job_key, variables).await?;
        Ok(())
    }

    pub async fn handle_job_failed(&self, job_key: &str) -> EngineResult<()> {
        self.processor.handle_job_failed(job_key).await?;
        Ok(())
    }

    pub async fn handle_job_thrown_error(
        &self,
        job_key: &str,
        error_code: &str,
        message: Option<String>,
        variables: Option<Value>,
    ) -> EngineResult<()> {
        self.processor
            .handle_job_thrown_error(job_key, error_code, message, variables)
            .await?;
        Ok(())
    }

    pub async fn handle_message_correlated(
        &self,
        process_instance_id: Uuid,
        subscription_id: Uuid,
        variables: Value,
    ) -> EngineResult<()> {
        self.processor
            .handle_message_correlated(process_instance_id, subscription_id, variables)
            .await?;
        Ok(())
    }

    pub async fn handle_signal(&self, name: &str, variables: Value) -> EngineResult<()> {
        self.processor.handle_signal(name, variables).await?;
        Ok(())
    }

    /// Publish a message from outside any running token — e.g. a deployment
    /// start-event correlation or an external system announcing an event
    /// with no engine-side waiter yet (spec §4.5).
    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: Value,
    ) -> EngineResult<()> {
        self.processor
            .publish_message(name, correlation_key, variables)
            .await?;
        Ok(())
    }

    /// Inspect a process instance: its state, live tokens, and open
    /// incidents.
    pub async fn inspect(&self, instance_id: Uuid) -> EngineResult<InstanceInspection> {
        let instance = self
            .store
            .load_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        let tokens = self.store.load_tokens_for_instance(instance_id).await?;
        let incidents = self.store.load_incidents(instance_id).await?;
        Ok(InstanceInspection {
            instance_id,
            process_key: instance.process_key,
            state: instance.state,
            tokens,
            incidents,
        })
    }

    /// Read the instance's append-only runtime event log from `from_seq`.
    pub async fn read_events(
        &self,
        instance_id: Uuid,
        from_seq: u64,
    ) -> EngineResult<Vec<(u64, RuntimeEvent)>> {
        Ok(self.store.read_events(instance_id, from_seq).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Element, ElementType};
    use crate::expr::LiteralEvaluator;
    use crate::http_client::LoopbackHttpClient;
    use crate::store_memory::MemoryStore;
    use std::collections::BTreeMap;

    fn single_task_definition() -> ProcessDefinition {
        let mut elements = BTreeMap::new();
        let mut start = Element::new("start", ElementType::StartEvent);
        start.outgoing = vec!["f1".into()];
        elements.insert(start.id.clone(), start);

        let mut flow1 = Element::new("f1", ElementType::SequenceFlow);
        flow1.target_ref = Some("task1".into());
        elements.insert(flow1.id.clone(), flow1);

        let mut task = Element::new("task1", ElementType::ServiceTask);
        task.outgoing = vec!["f2".into()];
        task.task_definition = Some(crate::definition::TaskDefinition {
            task_type: "do_work".into(),
            retries: 3,
        });
        elements.insert(task.id.clone(), task);

        let mut flow2 = Element::new("f2", ElementType::SequenceFlow);
        flow2.target_ref = Some("end".into());
        elements.insert(flow2.id.clone(), flow2);

        let end = Element::new("end", ElementType::EndEvent);
        elements.insert(end.id.clone(), end);

        ProcessDefinition {
            process_id: "proc".into(),
            version: 1,
            elements,
        }
    }

    #[tokio::test]
    async fn deploy_and_start_parks_on_job() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(LiteralEvaluator::default());
        let http_client: Arc<dyn HttpClient> = Arc::new(LoopbackHttpClient);
        let engine = Engine::new(store.clone(), evaluator, http_client);

        engine.deploy(single_task_definition()).await.unwrap();
        let instance_id = engine
            .start_instance("proc", 1, Value::empty_object())
            .await
            .unwrap();

        let inspection = engine.inspect(instance_id).await.unwrap();
        assert_eq!(inspection.state, InstanceState::Active);
        assert_eq!(inspection.tokens.len(), 1);
    }

    #[tokio::test]
    async fn start_instance_missing_definition_errors() {
        let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
        let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(LiteralEvaluator::default());
        let http_client: Arc<dyn HttpClient> = Arc::new(LoopbackHttpClient);
        let engine = Engine::new(store, evaluator, http_client);

        let result = engine.start_instance("ghost", 1, Value::empty_object()).await;
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }
}
