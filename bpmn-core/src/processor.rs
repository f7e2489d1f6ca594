//! Execution Processor (spec §4.1): applies an `ExecutionResult` and its
//! `EngineAction` to durable state — sequence-flow traversal, conditional
//! flow selection, fork/join synchronization, boundary-event lifecycle, job
//! and timer creation, message/signal dispatch, event-based-gateway racing,
//! subprocess/call-activity hierarchy, and instance completion detection.

use crate::boundary::{BoundaryFireOutcome, BoundaryManager};
use crate::correlation::{MessageCorrelator, PublishOutcome, SubscribeOutcome};
use crate::definition::{Element, ElementType, EventDefinitionType, ProcessDefinition};
use crate::events::RuntimeEvent;
use crate::executors::{EngineAction, ExecutorContext, ExecutorRegistry};
use crate::expr::{evaluate_to_literal_string, ExpressionEvaluator};
use crate::http_client::HttpClient;
use crate::incident::{Incident, IncidentStatus, IncidentType};
use crate::instance::{now_ms, InstanceState, ProcessInstance};
use crate::job::Job;
use crate::message::MessageSubscription;
use crate::store::ProcessStore;
use crate::timer::{Timer, TimerProcessContext, TimerState, TimerType};
use crate::timer_wheel::{due_at_for_spec, next_cycle_timer};
use crate::token::{Token, TokenState, WaitingFor};
use crate::value::{reserved, Value};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Namespacing convention that lets signal subscriptions share the message
/// subscription table without a schema change (see DESIGN.md).
pub(crate) fn signal_channel(name: &str) -> String {
    format!("__signal__:{name}")
}

fn is_join(element: &Element) -> bool {
    element.incoming.len() > 1 && element.outgoing.len() <= 1
}

/// Clear a parent token's "subprocess already forked" marker when its
/// subprocess wait is torn down from under it (cancel, termination, or an
/// interrupting boundary event) — otherwise a later re-entry onto the same
/// subprocess element silently no-ops via `was_executed` (spec §9 item 3).
fn clear_subprocess_executed_if_waiting(token: &mut Token) {
    if let Some(WaitingFor::Subprocess(element_id)) = token.waiting_for.clone() {
        token.clear_executed(SUBPROCESS_EXECUTED_PREFIX, &element_id);
    }
}

/// Apply a correlated message to a resumed token (spec §4.5): the message's
/// own variables go under `data`, plus the three correlation flags.
fn apply_message_correlation(
    token: &mut Token,
    message_variables: &Value,
    message_id: Uuid,
    correlation_key: Option<&str>,
) {
    let mut wrapped = Value::empty_object();
    wrapped.set_path(reserved::DATA, message_variables.clone());
    token.variables.merge_from(&wrapped);
    token
        .variables
        .set_path(reserved::MESSAGE_CORRELATED, Value::from(true));
    token
        .variables
        .set_path(reserved::MESSAGE_ID, Value::from(message_id.to_string()));
    token.variables.set_path(
        reserved::CORRELATION_KEY,
        Value::from(correlation_key.unwrap_or_default()),
    );
    token
        .variables
        .set_path(reserved::CORRELATED_BY, Value::from("message"));
}

const CALL_ACTIVITY_EXECUTED_PREFIX: &str = "call_activity_executed";
const SUBPROCESS_EXECUTED_PREFIX: &str = "subprocess_executed";

pub struct ExecutionProcessor {
    store: Arc<dyn ProcessStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    http_client: Arc<dyn HttpClient>,
    registry: ExecutorRegistry,
    boundary: BoundaryManager,
    correlator: MessageCorrelator,
}

impl ExecutionProcessor {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            boundary: BoundaryManager::new(store.clone()),
            correlator: MessageCorrelator::new(store.clone()),
            registry: ExecutorRegistry::new(),
            store,
            evaluator,
            http_client,
        }
    }

    /// Drive one token to completion of its current synchronous step(s),
    /// following sequence-flow tail calls and any forks it produces, all the
    /// way until every resulting token is either waiting or terminal.
    pub async fn execute_token(&self, token_id: Uuid) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(token_id);
        self.drain(queue).await
    }

    async fn drain(&self, mut queue: VecDeque<Uuid>) -> Result<()> {
        while let Some(id) = queue.pop_front() {
            self.execute_one(id, &mut queue).await?;
        }
        Ok(())
    }

    async fn execute_one(&self, token_id: Uuid, queue: &mut VecDeque<Uuid>) -> Result<()> {
        let Some(mut token) = self.store.load_token(token_id).await? else {
            return Ok(());
        };
        if token.state.is_terminal() {
            return Ok(());
        }

        let definition = self
            .store
            .load_definition(&token.process_key)
            .await?
            .ok_or_else(|| anyhow!("process definition not found: {}", token.process_key))?;

        loop {
            let element = definition
                .get(&token.current_element_id)
                .ok_or_else(|| anyhow!("element not found: {}", token.current_element_id))?
                .clone();

            if element.element_type == ElementType::SequenceFlow {
                let Some(target) = &element.target_ref else {
                    return self
                        .fail_with_incident(&mut token, "sequence flow has no target")
                        .await;
                };
                token.current_element_id = target.clone();
                continue;
            }

            return self.execute_element(token, &definition, &element, queue).await;
        }
    }

    async fn execute_element(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        let is_activity = matches!(
            element.element_type,
            ElementType::ServiceTask
                | ElementType::UserTask
                | ElementType::ScriptTask
                | ElementType::SendTask
                | ElementType::ReceiveTask
                | ElementType::CallActivity
                | ElementType::SubProcess
        );
        if is_activity && token.boundary_timer_ids.is_empty() {
            self.boundary
                .enter_activity(definition, element, &mut token, self.evaluator.as_ref())
                .await?;
        }

        let Some(executor) = self.registry.resolve(element) else {
            return self
                .fail_with_incident(&mut token, &format!("no executor for element type on {}", element.id))
                .await;
        };

        let ctx = ExecutorContext {
            element,
            token: &token,
            definition,
            evaluator: self.evaluator.as_ref(),
        };
        let result = match executor.execute(&ctx) {
            Ok(r) => r,
            Err(e) => return self.fail_with_incident(&mut token, &e.to_string()).await,
        };

        if let Some(vars) = &result.variables {
            token.variables = vars.clone();
        }

        if !result.success {
            let message = result.error.unwrap_or_default();
            return self.fail_with_incident(&mut token, &message).await;
        }

        // Synchronization join: parallel/inclusive gateways with more than
        // one incoming flow and a single outgoing flow.
        if matches!(
            element.element_type,
            ElementType::ParallelGateway | ElementType::InclusiveGateway
        ) && is_join(element)
        {
            return self.join_arrive(token, definition, element, queue).await;
        }

        if result.completed {
            return self.complete_token(token, &result.action, queue).await;
        }

        if matches!(result.waiting_for, Some(WaitingFor::CompetingEvents)) {
            return self.enter_event_based_gateway(token, definition, element, queue).await;
        }

        if let Some(waiting_for) = result.waiting_for.clone() {
            return self
                .park_and_act(token, definition, element, waiting_for, result.action, queue)
                .await;
        }

        self.advance(
            token,
            definition,
            element,
            &result.next_elements,
            result.needs_condition_eval,
            result.select_all_true,
            queue,
        )
        .await
    }

    /// Select which outgoing sequence flows are taken, applying condition
    /// evaluation + default-flow fallback for exclusive/inclusive forks.
    fn select_flows(
        &self,
        flow_ids: &[String],
        definition: &ProcessDefinition,
        variables: &Value,
        select_all_true: bool,
    ) -> Result<Vec<String>> {
        let mut true_flows = Vec::new();
        let mut default_flow = None;

        for id in flow_ids {
            let flow = definition
                .get(id)
                .ok_or_else(|| anyhow!("sequence flow not found: {id}"))?;
            if flow.is_default {
                default_flow = Some(id.clone());
                continue;
            }
            let is_true = match &flow.condition {
                None => true,
                Some(expr) => self
                    .evaluator
                    .evaluate(expr, variables)
                    .map(|v| v.is_truthy())
                    .map_err(|e| anyhow!("condition on flow {id} failed: {e}"))?,
            };
            if is_true {
                true_flows.push(id.clone());
                if !select_all_true {
                    break;
                }
            }
        }

        if true_flows.is_empty() {
            if let Some(d) = default_flow {
                return Ok(vec![d]);
            }
            return Err(anyhow!(
                "no outgoing flow condition evaluated true and no default flow"
            ));
        }
        Ok(true_flows)
    }

    /// Advance a token along one or more already-selected outgoing sequence
    /// flows: single target repositions the same token; multiple targets
    /// fork it into siblings (spec §4.3).
    async fn advance(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        flow_ids: &[String],
        needs_condition_eval: bool,
        select_all_true: bool,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        if flow_ids.is_empty() {
            return self.complete_token(token, &EngineAction::None, queue).await;
        }

        let selected = if needs_condition_eval {
            match self.select_flows(flow_ids, definition, &token.variables, select_all_true) {
                Ok(s) => s,
                Err(e) => return self.fail_with_incident(&mut token, &e.to_string()).await,
            }
        } else {
            flow_ids.to_vec()
        };

        if selected.len() > 1 {
            if let Some(join_ref) = &element.paired_join_ref {
                if let Some(mut instance) = self.store.load_instance(token.process_instance_id).await? {
                    instance
                        .join_expected
                        .insert(join_ref.clone(), selected.len() as u32);
                    instance.touch();
                    self.store.save_instance(&instance).await?;
                }
            }

            let mut children = Vec::new();
            for flow_id in &selected {
                let target = definition
                    .get(flow_id)
                    .and_then(|f| f.target_ref.clone())
                    .unwrap_or_else(|| flow_id.clone());
                let child = token.fork_to(&target);
                self.store.save_token(&child).await?;
                children.push(child.id);
            }
            self.store
                .append_event(
                    token.process_instance_id,
                    &RuntimeEvent::TokenForked {
                        token_id: token.id,
                        children: children.clone(),
                        targets: selected,
                    },
                )
                .await?;
            self.store.delete_token(token.id).await?;
            queue.extend(children);
            return Ok(());
        }

        let flow_id = selected.into_iter().next().unwrap();
        let target = definition
            .get(&flow_id)
            .and_then(|f| f.target_ref.clone())
            .unwrap_or(flow_id);
        token.current_element_id = target;
        token.touch();
        self.store.save_token(&token).await?;
        queue.push_back(token.id);
        Ok(())
    }

    /// Re-enter the element the token is currently parked on and advance
    /// past it along its outgoing flows — used whenever an external wait
    /// (job, message, signal, single timer) has just been satisfied. Never
    /// re-invokes the element's own executor, which would simply recreate
    /// the same wait.
    async fn advance_past_current(&self, mut token: Token, queue: &mut VecDeque<Uuid>) -> Result<()> {
        let definition = self
            .store
            .load_definition(&token.process_key)
            .await?
            .ok_or_else(|| anyhow!("process definition not found: {}", token.process_key))?;
        let Some(element) = definition.get(&token.current_element_id).cloned() else {
            return self
                .fail_with_incident(&mut token, "element not found on resume")
                .await;
        };
        self.boundary.exit_activity(&mut token).await?;
        token.resume();
        self.advance(token, &definition, &element, &element.outgoing, false, false, queue)
            .await
    }

    async fn join_arrive(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        let mut instance = self
            .store
            .load_instance(token.process_instance_id)
            .await?
            .ok_or_else(|| anyhow!("instance not found: {}", token.process_instance_id))?;

        let expected = if element.element_type == ElementType::InclusiveGateway {
            instance
                .join_expected
                .get(&element.id)
                .copied()
                .unwrap_or(element.incoming.len() as u32)
        } else {
            element.incoming.len() as u32
        };

        let arrived = self
            .store
            .join_arrive(token.process_instance_id, &element.id)
            .await?;

        // Merge this arrival's variables into the process instance so the
        // surviving continuation token sees every branch's output.
        instance.variables.merge_from(&token.variables);
        instance.touch();

        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::GatewayJoinArrived {
                    gateway_id: element.id.clone(),
                    token_id: token.id,
                    arrived,
                    expected,
                },
            )
            .await?;

        if arrived < expected {
            self.store.save_instance(&instance).await?;
            token.state = TokenState::Completed;
            token.touch();
            self.store.save_token(&token).await?;
            self.store.delete_token(token.id).await?;
            return Ok(());
        }

        self.store
            .join_reset(token.process_instance_id, &element.id)
            .await?;
        if element.element_type == ElementType::InclusiveGateway {
            instance.join_expected.remove(&element.id);
        }
        self.store.save_instance(&instance).await?;

        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::GatewayJoinReleased {
                    gateway_id: element.id.clone(),
                    released_token_id: token.id,
                },
            )
            .await?;

        token.variables = instance.variables.clone();
        self.advance(token, definition, element, &element.outgoing, false, false, queue)
            .await
    }

    async fn park_and_act(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        waiting_for: WaitingFor,
        action: EngineAction,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        token.park(waiting_for.clone());
        self.store.save_token(&token).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::TokenParked {
                    token_id: token.id,
                    waiting_for: waiting_for.as_tag(),
                },
            )
            .await?;

        self.apply_action(token, definition, element, action, queue).await
    }

    async fn apply_action(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        action: EngineAction,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        match action {
            EngineAction::None => Ok(()),

            EngineAction::CreateJob { task_type, retries } => {
                let job = Job::new(
                    token.process_instance_id,
                    token.id,
                    element.id.clone(),
                    task_type,
                    retries,
                    token.variables.clone(),
                );
                self.store.save_job(&job).await?;
                token.waiting_for = Some(WaitingFor::Job(job.key.clone()));
                self.store.save_token(&token).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::JobCreated {
                            job_key: job.key,
                            job_type: job.job_type,
                            element_id: element.id.clone(),
                        },
                    )
                    .await?;
                Ok(())
            }

            EngineAction::CreateUserTask { task_type } => {
                let job = Job::new(
                    token.process_instance_id,
                    token.id,
                    element.id.clone(),
                    task_type,
                    0,
                    token.variables.clone(),
                );
                self.store.save_job(&job).await?;
                token.waiting_for = Some(WaitingFor::Job(job.key.clone()));
                self.store.save_token(&token).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::JobCreated {
                            job_key: job.key,
                            job_type: job.job_type,
                            element_id: element.id.clone(),
                        },
                    )
                    .await?;
                Ok(())
            }

            EngineAction::CreateHttpJob { config, outputs } => {
                let response = self.http_client.send(&config).await?;
                let mut vars = token.variables.clone();
                let mut response_obj = Value::empty_object();
                response_obj.set_path("status", Value::Number(response.status as f64));
                response_obj.set_path("body", Value::String(response.body.clone()));
                vars.set_path(reserved::RESPONSE, response_obj);

                for out in &outputs {
                    if let Some(v) = vars.get_path(&out.source).cloned() {
                        vars.set_path(&out.target, v);
                    }
                }
                token.variables = vars;
                self.boundary.exit_activity(&mut token).await?;
                token.resume();
                self.advance(token, definition, element, &element.outgoing, false, false, queue)
                    .await
            }

            EngineAction::ScheduleTimer { timer_type, spec } => {
                let due_at = due_at_for_spec(&spec, now_ms())?;
                let timer = Timer::new(
                    element.id.clone(),
                    Some(token.id),
                    Some(token.process_instance_id),
                    timer_type,
                    due_at,
                    spec,
                    TimerProcessContext {
                        process_id: definition.process_id.clone(),
                        version: definition.version,
                        component_source: "catch_event".into(),
                    },
                );
                self.store.save_timer(&timer).await?;
                token.waiting_for = Some(WaitingFor::Timer(timer.id.to_string()));
                self.store.save_token(&token).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::TimerScheduled {
                            timer_id: timer.id,
                            element_id: element.id.clone(),
                            due_at: timer.due_at,
                        },
                    )
                    .await?;
                Ok(())
            }

            EngineAction::AwaitMessage {
                name,
                correlation_key,
            } => {
                let sub = MessageSubscription {
                    id: Uuid::now_v7(),
                    process_id: definition.process_id.clone(),
                    process_version: definition.version,
                    waiting_element_id: element.id.clone(),
                    message_name: name.clone(),
                    correlation_key: Some(correlation_key),
                    is_active: true,
                    tenant_id: None,
                    token_id: Some(token.id),
                    process_instance_id: Some(token.process_instance_id),
                    created_at: now_ms(),
                    updated_at: now_ms(),
                };
                match self.correlator.subscribe(sub).await? {
                    SubscribeOutcome::Subscribed { .. } => Ok(()),
                    SubscribeOutcome::Consumed { message } => {
                        apply_message_correlation(
                            &mut token,
                            &message.variables,
                            message.id,
                            Some(message.correlation_key.as_str()),
                        );
                        self.advance_past_current(token, queue).await
                    }
                }
            }

            EngineAction::PublishMessage {
                name,
                correlation_key,
                variables,
            } => {
                match self
                    .correlator
                    .publish(&name, &correlation_key, &variables, Some(&element.id))
                    .await?
                {
                    PublishOutcome::Buffered { .. } => {}
                    PublishOutcome::Correlated { subscription } => {
                        self.resolve_subscription(&subscription, &variables, Some(Uuid::now_v7()), queue)
                            .await?;
                    }
                }
                Ok(())
            }

            EngineAction::AwaitSignal { name } => {
                let sub = MessageSubscription {
                    id: Uuid::now_v7(),
                    process_id: definition.process_id.clone(),
                    process_version: definition.version,
                    waiting_element_id: element.id.clone(),
                    message_name: signal_channel(&name),
                    correlation_key: None,
                    is_active: true,
                    tenant_id: None,
                    token_id: Some(token.id),
                    process_instance_id: Some(token.process_instance_id),
                    created_at: now_ms(),
                    updated_at: now_ms(),
                };
                self.store.save_subscription(&sub).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::MessageSubscriptionCreated {
                            subscription_id: sub.id,
                            name: sub.message_name,
                        },
                    )
                    .await?;
                Ok(())
            }

            EngineAction::PublishSignal { name, variables } => {
                self.broadcast_signal(&name, &variables).await
            }

            EngineAction::StartCallActivity {
                process_id,
                variables,
            } => {
                self.start_call_activity(token, element, &process_id, variables).await
            }

            EngineAction::ForkSubprocess { subprocess_id } => {
                self.fork_subprocess(token, &subprocess_id, queue).await
            }

            EngineAction::ThrowError {
                error_code,
                message,
                variables,
            } => {
                self.handle_thrown_error(token, definition, &error_code, message, variables, queue)
                    .await
            }

            EngineAction::Terminate => self.terminate_instance(token.process_instance_id).await,
        }
    }

    /// Resolve a matched subscription: move the token to the element it was
    /// actually waiting on (itself for a plain catch event; the winning
    /// target for an event-based gateway), merge variables, cancel any
    /// sibling competitors, and advance past it.
    async fn resolve_subscription(
        &self,
        subscription: &MessageSubscription,
        variables: &Value,
        message_id: Option<Uuid>,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        if let Some(token_id) = subscription.token_id {
            self.store.remove_subscription(subscription.id).await.ok();
            let Some(mut token) = self.store.load_token(token_id).await? else {
                return Ok(());
            };
            self.cancel_competing_waits(&mut token, None, Some(subscription.id)).await?;
            token.current_element_id = subscription.waiting_element_id.clone();
            match message_id {
                Some(message_id) => apply_message_correlation(
                    &mut token,
                    variables,
                    message_id,
                    subscription.correlation_key.as_deref(),
                ),
                None => {
                    token.variables.merge_from(variables);
                    token
                        .variables
                        .set_path(reserved::CORRELATED_BY, Value::from("message"));
                }
            }
            self.advance_past_current(token, queue).await
        } else {
            self.start_instance_from_subscription(subscription, variables).await
        }
    }

    async fn start_instance_from_subscription(
        &self,
        subscription: &MessageSubscription,
        variables: &Value,
    ) -> Result<()> {
        let process_key =
            ProcessDefinition::process_key(&subscription.process_id, subscription.process_version);
        let Some(definition) = self.store.load_definition(&process_key).await? else {
            return Ok(());
        };
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
            subscription.waiting_element_id.clone(),
            variables.clone(),
            None,
        );
        self.store.save_token(&token).await?;
        self.execute_token(token.id).await
    }

    async fn broadcast_signal(&self, name: &str, variables: &Value) -> Result<()> {
        let channel = signal_channel(name);
        let subs = self.store.find_active_subscriptions(&channel).await?;
        if subs.is_empty() {
            self.store
                .append_event(
                    Uuid::nil(),
                    &RuntimeEvent::LateSignalIgnored {
                        description: format!("no subscriber for signal {name}"),
                    },
                )
                .await?;
            return Ok(());
        }
        for sub in subs {
            self.store.remove_subscription(sub.id).await?;
            let mut queue = VecDeque::new();
            self.resolve_subscription(&sub, variables, None, &mut queue).await?;
            self.drain(queue).await?;
        }
        Ok(())
    }

    async fn start_call_activity(
        &self,
        mut parent: Token,
        element: &Element,
        process_id: &str,
        variables: Value,
    ) -> Result<()> {
        // Called-process version resolution is not modeled upstream of this
        // engine yet; always resolve version 1 (see DESIGN.md open question).
        let process_key = ProcessDefinition::process_key(process_id, 1);
        let Some(child_definition) = self.store.load_definition(&process_key).await? else {
            return self
                .fail_with_incident(&mut parent, &format!("called process not found: {process_id}"))
                .await;
        };
        let Some(start) = child_definition.none_start_events().into_iter().next() else {
            return self
                .fail_with_incident(
                    &mut parent,
                    &format!("called process {process_id} has no start event"),
                )
                .await;
        };
        let start_id = start.id.clone();

        let child_instance = ProcessInstance::new(Uuid::now_v7(), child_definition.key(), variables.clone());
        self.store.save_instance(&child_instance).await?;
        self.store
            .append_event(
                child_instance.instance_id,
                &RuntimeEvent::InstanceStarted {
                    instance_id: child_instance.instance_id,
                    process_key: child_instance.process_key.clone(),
                },
            )
            .await?;

        let child_token = Token::new(
            child_instance.instance_id,
            child_definition.key(),
            start_id,
            variables,
            Some(parent.id),
        );
        self.store.save_token(&child_token).await?;

        parent.mark_executed(CALL_ACTIVITY_EXECUTED_PREFIX, &element.id);
        parent.waiting_for = Some(WaitingFor::CallActivity(child_instance.instance_id));
        self.store.save_token(&parent).await?;

        self.execute_token(child_token.id).await
    }

    async fn fork_subprocess(&self, mut parent: Token, subprocess_id: &str, queue: &mut VecDeque<Uuid>) -> Result<()> {
        let definition = self
            .store
            .load_definition(&parent.process_key)
            .await?
            .ok_or_else(|| anyhow!("process definition not found: {}", parent.process_key))?;
        let starts: Vec<String> = definition
            .subprocess_start_events(subprocess_id)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();

        parent.mark_executed(SUBPROCESS_EXECUTED_PREFIX, subprocess_id);
        self.store.save_token(&parent).await?;

        for start_id in starts {
            let mut child = Token::new(
                parent.process_instance_id,
                parent.process_key.clone(),
                start_id.clone(),
                parent.variables.clone(),
                Some(parent.id),
            );
            child.sub_process_id = Some(subprocess_id.to_string());
            self.store.save_token(&child).await?;
            self.store
                .append_event(
                    parent.process_instance_id,
                    &RuntimeEvent::TokenCreated {
                        token_id: child.id,
                        element_id: start_id,
                        parent_token_id: Some(parent.id),
                    },
                )
                .await?;
            queue.push_back(child.id);
        }
        Ok(())
    }

    async fn handle_thrown_error(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        error_code: &str,
        message: Option<String>,
        variables: Option<Value>,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        if let Some(vars) = variables {
            token.variables.merge_from(&vars);
        }

        match self.find_error_boundary_bubbling(token.id, error_code).await? {
            Some(sub) => {
                self.boundary.exit_activity(&mut token).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::ErrorBoundaryMatched {
                            token_id: token.id,
                            error_code: error_code.to_string(),
                            boundary_element_id: sub.element_id.clone(),
                        },
                    )
                    .await?;
                match definition.get(&sub.element_id).cloned() {
                    Some(boundary_element) => {
                        self.advance(token, definition, &boundary_element, &sub.outgoing_flows, false, false, queue)
                            .await
                    }
                    None => {
                        self.fail_with_incident(
                            &mut token,
                            &format!("boundary element not found: {}", sub.element_id),
                        )
                        .await
                    }
                }
            }
            None => {
                let incident = Incident {
                    id: Uuid::now_v7(),
                    incident_type: IncidentType::UnhandledBpmnError,
                    process_instance_id: token.process_instance_id,
                    element_id: token.current_element_id.clone(),
                    job_key: None,
                    error_code: Some(error_code.to_string()),
                    message: message.unwrap_or_else(|| format!("unhandled BPMN error: {error_code}")),
                    status: IncidentStatus::Open,
                    created_at: now_ms(),
                };
                self.store.save_incident(&incident).await?;
                self.store
                    .append_event(
                        token.process_instance_id,
                        &RuntimeEvent::IncidentCreated {
                            incident_id: incident.id,
                            element_id: incident.element_id.clone(),
                            job_key: None,
                        },
                    )
                    .await?;
                self.fail_token(&mut token, &format!("unhandled BPMN error: {error_code}"))
                    .await
            }
        }
    }

    async fn find_error_boundary_bubbling(
        &self,
        token_id: Uuid,
        error_code: &str,
    ) -> Result<Option<crate::incident::ErrorBoundarySubscription>> {
        let mut current = Some(token_id);
        while let Some(id) = current {
            if let Some(sub) = self.boundary.find_error_boundary(id, error_code).await? {
                return Ok(Some(sub));
            }
            current = match self.store.load_token(id).await? {
                Some(t) => t.parent_token_id,
                None => None,
            };
        }
        Ok(None)
    }

    /// Cancel every non-terminal token of `instance_id`, tearing down their
    /// boundary subscriptions, without touching instance state — the caller
    /// (`Engine::cancel_instance`) owns the instance-level transition and
    /// event.
    pub async fn cancel_instance_tokens(&self, instance_id: Uuid) -> Result<()> {
        let tokens = self.store.load_tokens_for_instance(instance_id).await?;
        for mut t in tokens {
            if !t.state.is_terminal() {
                self.cancel_token_job(&t).await?;
                clear_subprocess_executed_if_waiting(&mut t);
                t.state = TokenState::Canceled;
                t.touch();
                self.boundary.exit_activity(&mut t).await?;
                self.store.save_token(&t).await?;
            }
        }
        Ok(())
    }

    /// Delete the in-flight job belonging to `token`, if any — called
    /// whenever a token is pulled out from under a job it's waiting on
    /// (boundary interrupt, instance cancellation, instance termination).
    async fn cancel_token_job(&self, token: &Token) -> Result<()> {
        if !matches!(token.waiting_for, Some(WaitingFor::Job(_))) {
            return Ok(());
        }
        for job in self.store.jobs_for_instance(token.process_instance_id).await? {
            if job.token_id == token.id {
                self.store.delete_job(&job.key).await?;
            }
        }
        Ok(())
    }

    /// Publish a message from outside any running token (spec §4.5): a
    /// deployment start-event correlation, or an external system announcing
    /// an event with no waiter registered yet.
    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: Value,
    ) -> Result<()> {
        match self.correlator.publish(name, correlation_key, &variables, None).await? {
            PublishOutcome::Buffered { .. } => Ok(()),
            PublishOutcome::Correlated { subscription } => {
                let mut queue = VecDeque::new();
                self.resolve_subscription(&subscription, &variables, Some(Uuid::now_v7()), &mut queue)
                    .await?;
                self.drain(queue).await
            }
        }
    }

    async fn terminate_instance(&self, instance_id: Uuid) -> Result<()> {
        let tokens = self.store.load_tokens_for_instance(instance_id).await?;
        for mut t in tokens {
            if !t.state.is_terminal() {
                self.cancel_token_job(&t).await?;
                clear_subprocess_executed_if_waiting(&mut t);
                t.state = TokenState::Canceled;
                t.touch();
                self.boundary.exit_activity(&mut t).await?;
                self.store.save_token(&t).await?;
            }
        }
        self.store
            .update_instance_state(instance_id, InstanceState::Completed)
            .await?;
        self.store
            .append_event(instance_id, &RuntimeEvent::InstanceCompleted { instance_id })
            .await?;
        Ok(())
    }

    async fn complete_token(
        &self,
        mut token: Token,
        action: &EngineAction,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        if matches!(action, EngineAction::Terminate) {
            return self.terminate_instance(token.process_instance_id).await;
        }

        token.state = TokenState::Completed;
        token.touch();
        self.boundary.exit_activity(&mut token).await?;
        self.store.save_token(&token).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::TokenCompleted {
                    token_id: token.id,
                    element_id: token.current_element_id.clone(),
                },
            )
            .await?;

        self.maybe_resume_parent(&token, queue).await?;
        self.finalize_instance_if_done(token.process_instance_id).await
    }

    /// Mark a token Failed and clean up its boundary subscriptions, without
    /// opening an incident (callers that need one create it first).
    async fn fail_token(&self, token: &mut Token, message: &str) -> Result<()> {
        token.state = TokenState::Failed;
        token.touch();
        self.boundary.exit_activity(token).await?;
        self.store.save_token(token).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::TokenFailed {
                    token_id: token.id,
                    element_id: token.current_element_id.clone(),
                    message: message.to_string(),
                },
            )
            .await?;
        self.finalize_instance_if_done(token.process_instance_id).await
    }

    /// Generic executor-failure path: open an `ExecutionError` incident, then
    /// fail the token (spec §4.7).
    async fn fail_with_incident(&self, token: &mut Token, message: &str) -> Result<()> {
        let incident = Incident {
            id: Uuid::now_v7(),
            incident_type: IncidentType::ExecutionError,
            process_instance_id: token.process_instance_id,
            element_id: token.current_element_id.clone(),
            job_key: None,
            error_code: None,
            message: message.to_string(),
            status: IncidentStatus::Open,
            created_at: now_ms(),
        };
        self.store.save_incident(&incident).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::IncidentCreated {
                    incident_id: incident.id,
                    element_id: incident.element_id.clone(),
                    job_key: None,
                },
            )
            .await?;
        self.fail_token(token, message).await
    }

    async fn maybe_resume_parent(&self, completed: &Token, queue: &mut VecDeque<Uuid>) -> Result<()> {
        let Some(parent_id) = completed.parent_token_id else {
            return Ok(());
        };
        let siblings = self
            .store
            .load_tokens_for_instance(completed.process_instance_id)
            .await?;
        let scope_done = siblings
            .iter()
            .filter(|t| t.parent_token_id == Some(parent_id) && t.sub_process_id == completed.sub_process_id)
            .all(|t| t.state.is_terminal());
        if !scope_done {
            return Ok(());
        }

        let Some(mut parent) = self.store.load_token(parent_id).await? else {
            return Ok(());
        };
        if parent.state.is_terminal() {
            return Ok(());
        }
        parent.variables.merge_from(&completed.variables);
        self.advance_past_current(parent, queue).await
    }

    async fn finalize_instance_if_done(&self, instance_id: Uuid) -> Result<()> {
        let tokens = self.store.load_tokens_for_instance(instance_id).await?;
        if tokens.is_empty() || !tokens.iter().all(|t| t.state.is_terminal()) {
            return Ok(());
        }
        let Some(instance) = self.store.load_instance(instance_id).await? else {
            return Ok(());
        };
        if instance.state.is_terminal() {
            return Ok(());
        }
        let any_failed = tokens.iter().any(|t| t.state == TokenState::Failed);
        let state = if any_failed {
            InstanceState::Failed
        } else {
            InstanceState::Completed
        };
        self.store
            .update_instance_state(instance_id, state.clone())
            .await?;
        if state == InstanceState::Completed {
            self.store
                .append_event(instance_id, &RuntimeEvent::InstanceCompleted { instance_id })
                .await?;
        }
        Ok(())
    }

    // ── Event-based gateway (spec §4.3) ──

    /// Create one timer/message/signal subscription per outgoing target and
    /// park the token on `CompetingEvents`. If a message target is already
    /// satisfied by a buffered message, the race is won immediately.
    async fn enter_event_based_gateway(
        &self,
        mut token: Token,
        definition: &ProcessDefinition,
        element: &Element,
        queue: &mut VecDeque<Uuid>,
    ) -> Result<()> {
        token.park(WaitingFor::CompetingEvents);

        for flow_id in &element.outgoing {
            let Some(flow) = definition.get(flow_id) else {
                return self
                    .fail_with_incident(&mut token, &format!("flow not found: {flow_id}"))
                    .await;
            };
            let Some(target) = flow.target_ref.as_ref().and_then(|t| definition.get(t)) else {
                return self
                    .fail_with_incident(&mut token, &format!("flow target not found: {flow_id}"))
                    .await;
            };
            let Some(def) = target.event_definitions.first() else {
                return self
                    .fail_with_incident(
                        &mut token,
                        &format!("event-based gateway target {} has no event definition", target.id),
                    )
                    .await;
            };

            match def.kind {
                EventDefinitionType::Timer => {
                    let spec = match crate::timer::spec_from_event_definition(def) {
                        Ok(s) => s,
                        Err(e) => return self.fail_with_incident(&mut token, &e).await,
                    };
                    let due_at = due_at_for_spec(&spec, now_ms())?;
                    let timer = Timer::new(
                        target.id.clone(),
                        Some(token.id),
                        Some(token.process_instance_id),
                        TimerType::Event,
                        due_at,
                        spec,
                        TimerProcessContext {
                            process_id: definition.process_id.clone(),
                            version: definition.version,
                            component_source: "event_based_gateway".into(),
                        },
                    );
                    self.store.save_timer(&timer).await?;
                    token.competing_timer_ids.push(timer.id);
                }
                EventDefinitionType::Message => {
                    let Some(name) = &def.message_name else {
                        return self
                            .fail_with_incident(
                                &mut token,
                                &format!("event-based gateway target {} missing messageName", target.id),
                            )
                            .await;
                    };
                    let key_expr = def.correlation_key.as_deref().unwrap_or("");
                    let key = if key_expr.is_empty() {
                        String::new()
                    } else {
                        match evaluate_to_literal_string(self.evaluator.as_ref(), key_expr, &token.variables) {
                            Ok(k) => k,
                            Err(e) => return self.fail_with_incident(&mut token, &e.to_string()).await,
                        }
                    };
                    let sub = MessageSubscription {
                        id: Uuid::now_v7(),
                        process_id: definition.process_id.clone(),
                        process_version: definition.version,
                        waiting_element_id: target.id.clone(),
                        message_name: name.clone(),
                        correlation_key: Some(key),
                        is_active: true,
                        tenant_id: None,
                        token_id: Some(token.id),
                        process_instance_id: Some(token.process_instance_id),
                        created_at: now_ms(),
                        updated_at: now_ms(),
                    };
                    match self.correlator.subscribe(sub).await? {
                        SubscribeOutcome::Subscribed { subscription_id } => {
                            token.competing_subscription_ids.push(subscription_id);
                        }
                        SubscribeOutcome::Consumed { message } => {
                            // This branch already won the race; cancel the
                            // siblings set up so far and advance immediately.
                            self.cancel_competing_waits(&mut token, None, None).await?;
                            token.current_element_id = target.id.clone();
                            token.variables.merge_from(&message.variables);
                            return self.advance_past_current(token, queue).await;
                        }
                    }
                }
                EventDefinitionType::Signal => {
                    let Some(name) = &def.signal_name else {
                        return self
                            .fail_with_incident(
                                &mut token,
                                &format!("event-based gateway target {} missing signalName", target.id),
                            )
                            .await;
                    };
                    let sub = MessageSubscription {
                        id: Uuid::now_v7(),
                        process_id: definition.process_id.clone(),
                        process_version: definition.version,
                        waiting_element_id: target.id.clone(),
                        message_name: signal_channel(name),
                        correlation_key: None,
                        is_active: true,
                        tenant_id: None,
                        token_id: Some(token.id),
                        process_instance_id: Some(token.process_instance_id),
                        created_at: now_ms(),
                        updated_at: now_ms(),
                    };
                    self.store.save_subscription(&sub).await?;
                    token.competing_subscription_ids.push(sub.id);
                }
                EventDefinitionType::None | EventDefinitionType::Error | EventDefinitionType::Terminate => {
                    return self
                        .fail_with_incident(
                            &mut token,
                            &format!("unsupported event-based gateway target kind on {}", target.id),
                        )
                        .await;
                }
            }
        }

        self.store.save_token(&token).await
    }

    /// Cancel every competing timer/subscription on a token except the ones
    /// whose id is passed as the winner, then clear the race bookkeeping.
    async fn cancel_competing_waits(
        &self,
        token: &mut Token,
        keep_timer: Option<Uuid>,
        keep_subscription: Option<Uuid>,
    ) -> Result<()> {
        for id in token.competing_timer_ids.drain(..).collect::<Vec<_>>() {
            if Some(id) != keep_timer {
                self.store.update_timer_state(id, TimerState::Canceled).await.ok();
            }
        }
        for id in token.competing_subscription_ids.drain(..).collect::<Vec<_>>() {
            if Some(id) != keep_subscription {
                self.store.remove_subscription(id).await.ok();
            }
        }
        Ok(())
    }

    // ── Timer firing (spec §4.4 / §4.6) ──

    pub async fn handle_timer_fired(&self, timer_id: Uuid) -> Result<()> {
        let Some(timer) = self.store.load_timer(timer_id).await? else {
            return Ok(());
        };
        if timer.state != TimerState::Scheduled {
            return Ok(());
        }
        self.store.update_timer_state(timer_id, TimerState::Fired).await?;
        self.store
            .append_event(
                timer.process_instance_id.unwrap_or(Uuid::nil()),
                &RuntimeEvent::TimerFired {
                    timer_id,
                    element_id: timer.element_id.clone(),
                },
            )
            .await?;

        match timer.timer_type {
            TimerType::Start => self.fire_start_timer(&timer).await,
            TimerType::Event => self.fire_event_timer(&timer).await,
            TimerType::Boundary => self.fire_boundary_timer(&timer).await,
        }
    }

    async fn fire_start_timer(&self, timer: &Timer) -> Result<()> {
        let process_key =
            ProcessDefinition::process_key(&timer.process_context.process_id, timer.process_context.version);
        let Some(definition) = self.store.load_definition(&process_key).await? else {
            return Ok(());
        };
        let variables = Value::Object(
            timer.variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );
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
            timer.element_id.clone(),
            variables,
            None,
        );
        self.store.save_token(&token).await?;
        self.execute_token(token.id).await
    }

    async fn fire_event_timer(&self, timer: &Timer) -> Result<()> {
        let Some(token_id) = timer.token_id else {
            return Ok(());
        };
        let Some(mut token) = self.store.load_token(token_id).await? else {
            return Ok(());
        };
        if token.state.is_terminal() {
            return Ok(());
        }

        let mut queue = VecDeque::new();
        if token.competing_timer_ids.contains(&timer.id) {
            self.cancel_competing_waits(&mut token, Some(timer.id), None).await?;
            token.current_element_id = timer.element_id.clone();
        }
        self.advance_past_current(token, &mut queue).await?;
        self.drain(queue).await
    }

    async fn fire_boundary_timer(&self, timer: &Timer) -> Result<()> {
        let Some(parent_id) = timer.token_id else {
            return Ok(());
        };
        let Some(mut parent) = self.store.load_token(parent_id).await? else {
            return Ok(());
        };

        match self.boundary.fire_timer(&parent, timer) {
            BoundaryFireOutcome::Orphan => Ok(()),
            BoundaryFireOutcome::Interrupt { boundary_element_id } => {
                self.cancel_token_job(&parent).await?;
                clear_subprocess_executed_if_waiting(&mut parent);
                self.boundary.exit_activity(&mut parent).await?;
                parent.current_element_id = boundary_element_id.clone();
                parent.resume();
                self.store.save_token(&parent).await?;
                self.store
                    .append_event(
                        parent.process_instance_id,
                        &RuntimeEvent::BoundaryTimerInterrupted {
                            timer_id: timer.id,
                            token_id: parent.id,
                            boundary_element_id,
                        },
                    )
                    .await?;
                self.execute_token(parent.id).await
            }
            BoundaryFireOutcome::Spawn { boundary_element_id } => {
                let spawned = Token::new(
                    parent.process_instance_id,
                    parent.process_key.clone(),
                    boundary_element_id.clone(),
                    parent.variables.clone(),
                    Some(parent.id),
                );
                self.store.save_token(&spawned).await?;
                self.store
                    .append_event(
                        parent.process_instance_id,
                        &RuntimeEvent::BoundaryTimerSpawned {
                            timer_id: timer.id,
                            parent_token_id: parent.id,
                            spawned_token_id: spawned.id,
                            boundary_element_id,
                        },
                    )
                    .await?;

                let iteration = self.fired_iteration(timer);
                if let Some(next) = next_cycle_timer(timer, iteration)? {
                    self.store.save_timer(&next).await?;
                    parent.boundary_timer_ids.retain(|id| *id != timer.id);
                    parent.boundary_timer_ids.push(next.id);
                    self.store.save_token(&parent).await?;
                    self.store
                        .append_event(
                            parent.process_instance_id,
                            &RuntimeEvent::TimerCycleIteration {
                                timer_id: next.id,
                                iteration: iteration + 1,
                            },
                        )
                        .await?;
                }
                self.execute_token(spawned.id).await
            }
        }
    }

    fn fired_iteration(&self, timer: &Timer) -> u32 {
        timer
            .variables
            .get(crate::timer::VAR_CURRENT_ITERATION)
            .and_then(|v| v.as_f64())
            .map(|n| n as u32)
            .unwrap_or(1)
    }

    // ── Job lifecycle (spec §4.2) ──

    pub async fn handle_job_completed(&self, job_key: &str, variables: Value) -> Result<()> {
        let Some(job) = self.store.load_job(job_key).await? else {
            return Ok(());
        };
        let Some(mut token) = self.store.load_token(job.token_id).await? else {
            return Ok(());
        };
        token.variables.merge_from(&variables);
        self.store.delete_job(job_key).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::JobCompleted {
                    job_key: job_key.to_string(),
                },
            )
            .await?;
        let mut queue = VecDeque::new();
        self.advance_past_current(token, &mut queue).await?;
        self.drain(queue).await
    }

    pub async fn handle_job_failed(&self, job_key: &str) -> Result<()> {
        let Some(mut job) = self.store.load_job(job_key).await? else {
            return Ok(());
        };
        let Some(mut token) = self.store.load_token(job.token_id).await? else {
            return Ok(());
        };

        if job.retries > 0 {
            job.retries -= 1;
            self.store.save_job(&job).await?;
            self.store
                .append_event(
                    token.process_instance_id,
                    &RuntimeEvent::JobFailed {
                        job_key: job_key.to_string(),
                        retries_remaining: job.retries,
                    },
                )
                .await?;
            return Ok(());
        }

        self.store.delete_job(job_key).await?;
        let incident = Incident {
            id: Uuid::now_v7(),
            incident_type: IncidentType::JobFailureExhausted,
            process_instance_id: token.process_instance_id,
            element_id: job.element_id.clone(),
            job_key: Some(job_key.to_string()),
            error_code: None,
            message: "job retries exhausted".to_string(),
            status: IncidentStatus::Open,
            created_at: now_ms(),
        };
        self.store.save_incident(&incident).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::IncidentCreated {
                    incident_id: incident.id,
                    element_id: incident.element_id.clone(),
                    job_key: Some(job_key.to_string()),
                },
            )
            .await?;
        self.fail_token(&mut token, "job retries exhausted").await
    }

    pub async fn handle_job_thrown_error(
        &self,
        job_key: &str,
        error_code: &str,
        error_message: Option<String>,
        variables: Option<Value>,
    ) -> Result<()> {
        let Some(job) = self.store.load_job(job_key).await? else {
            return Ok(());
        };
        let Some(token) = self.store.load_token(job.token_id).await? else {
            return Ok(());
        };
        self.store.delete_job(job_key).await?;
        self.store
            .append_event(
                token.process_instance_id,
                &RuntimeEvent::JobErrorThrown {
                    job_key: job_key.to_string(),
                    error_code: error_code.to_string(),
                },
            )
            .await?;
        let definition = self
            .store
            .load_definition(&token.process_key)
            .await?
            .ok_or_else(|| anyhow!("process definition not found: {}", token.process_key))?;
        let mut queue = VecDeque::new();
        self.handle_thrown_error(token, &definition, error_code, error_message, variables, &mut queue)
            .await?;
        self.drain(queue).await
    }

    pub async fn handle_message_correlated(
        &self,
        process_instance_id: Uuid,
        subscription_id: Uuid,
        variables: Value,
    ) -> Result<()> {
        let subs = self.store.subscriptions_for_instance(process_instance_id).await?;
        let Some(sub) = subs.into_iter().find(|s| s.id == subscription_id) else {
            return Ok(());
        };
        self.store.remove_subscription(subscription_id).await?;
        let mut queue = VecDeque::new();
        self.resolve_subscription(&sub, &variables, Some(Uuid::now_v7()), &mut queue)
            .await?;
        self.drain(queue).await
    }

    /// HandleSignal: public broadcast entrypoint at the engine boundary.
    pub async fn handle_signal(&self, name: &str, variables: Value) -> Result<()> {
        self.broadcast_signal(name, &variables).await
    }
}
