//! End-to-end scenario tests driving `Engine` against hand-built process
//! definitions (no BPMN XML parser in this crate — definitions are
//! constructed directly as `ProcessDefinition` values).

use std::collections::BTreeMap;
use std::sync::Arc;

use bpmn_core::definition::{Element, ElementType, EventDefinition, EventDefinitionType, ProcessDefinition, TaskDefinition};
use bpmn_core::expr::{ExpressionEvaluator, LiteralEvaluator};
use bpmn_core::http_client::{HttpClient, LoopbackHttpClient};
use bpmn_core::incident::IncidentType;
use bpmn_core::instance::InstanceState;
use bpmn_core::store::ProcessStore;
use bpmn_core::store_memory::MemoryStore;
use bpmn_core::token::{TokenState, WaitingFor};
use bpmn_core::timer::TimerState;
use bpmn_core::value::Value;
use bpmn_core::Engine;

fn harness() -> (Engine, Arc<dyn ProcessStore>) {
    let store: Arc<dyn ProcessStore> = Arc::new(MemoryStore::new());
    let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(LiteralEvaluator::default());
    let http_client: Arc<dyn HttpClient> = Arc::new(LoopbackHttpClient);
    let engine = Engine::new(store.clone(), evaluator, http_client);
    (engine, store)
}

fn flow(id: &str, target: &str) -> Element {
    let mut f = Element::new(id, ElementType::SequenceFlow);
    f.target_ref = Some(target.to_string());
    f
}

// ── A. Simple linear ──

fn linear_definition(process_id: &str, task_type: &str) -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f1".into()];
    elements.insert(start.id.clone(), start);
    elements.insert("f1".into(), flow("f1", "task1"));

    let mut task = Element::new("task1", ElementType::ServiceTask);
    task.outgoing = vec!["f2".into()];
    task.task_definition = Some(TaskDefinition {
        task_type: task_type.into(),
        retries: 3,
    });
    elements.insert(task.id.clone(), task);
    elements.insert("f2".into(), flow("f2", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    ProcessDefinition {
        process_id: process_id.into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn scenario_a_simple_linear() {
    let (engine, store) = harness();
    engine.deploy(linear_definition("a_proc", "X")).await.unwrap();

    let mut start_vars = Value::empty_object();
    start_vars.set_path("a", Value::from(1.0));
    let instance_id = engine.start_instance("a_proc", 1, start_vars).await.unwrap();

    let jobs = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "X");

    let mut complete_vars = Value::empty_object();
    complete_vars.set_path("b", Value::from(2.0));
    engine
        .handle_job_completed(&jobs[0].key, complete_vars)
        .await
        .unwrap();

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    assert_eq!(inspection.tokens.len(), 1);
    let token = &inspection.tokens[0];
    assert_eq!(token.state, TokenState::Completed);
    assert_eq!(token.current_element_id, "end");
    assert_eq!(token.variables.get_path("a"), Some(&Value::Number(1.0)));
    assert_eq!(token.variables.get_path("b"), Some(&Value::Number(2.0)));
}

// ── B / C. Boundary timer on a service task ──

fn boundary_timer_definition(cancel_activity: bool, spec: &str) -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f1".into()];
    elements.insert(start.id.clone(), start);
    elements.insert("f1".into(), flow("f1", "task1"));

    let mut task = Element::new("task1", ElementType::ServiceTask);
    task.outgoing = vec!["f2".into()];
    task.task_definition = Some(TaskDefinition {
        task_type: "X".into(),
        retries: 3,
    });
    elements.insert(task.id.clone(), task);
    elements.insert("f2".into(), flow("f2", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    let mut boundary = Element::new("boundary1", ElementType::BoundaryEvent);
    boundary.attached_to_ref = Some("task1".into());
    boundary.cancel_activity = Some(cancel_activity);
    let mut def = EventDefinition::none();
    def.kind = EventDefinitionType::Timer;
    if spec.starts_with('R') {
        def.time_cycle = Some(spec.to_string());
    } else {
        def.time_duration = Some(spec.to_string());
    }
    boundary.event_definitions = vec![def];
    boundary.outgoing = vec!["f3".into()];
    elements.insert(boundary.id.clone(), boundary);
    elements.insert("f3".into(), flow("f3", "end2"));
    elements.insert("end2".into(), Element::new("end2", ElementType::EndEvent));

    ProcessDefinition {
        process_id: "boundary_proc".into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn scenario_b_interrupting_timer_boundary() {
    let (engine, store) = harness();
    engine
        .deploy(boundary_timer_definition(true, "PT1S"))
        .await
        .unwrap();
    let instance_id = engine
        .start_instance("boundary_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let jobs_before = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs_before.len(), 1);

    let tokens = store.load_tokens_for_instance(instance_id).await.unwrap();
    let parent = tokens.into_iter().find(|t| !t.state.is_terminal()).unwrap();
    let timers = store.load_timers_for_token(parent.id).await.unwrap();
    assert_eq!(timers.len(), 1);

    engine.handle_timer_fired(timers[0].id).await.unwrap();

    let jobs_after = store.jobs_for_instance(instance_id).await.unwrap();
    assert!(jobs_after.is_empty(), "job must be canceled on interrupt");

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    let done = inspection
        .tokens
        .iter()
        .find(|t| t.id == parent.id)
        .unwrap();
    assert_eq!(done.current_element_id, "end2");
    assert_eq!(done.state, TokenState::Completed);
}

#[tokio::test]
async fn scenario_c_non_interrupting_cycle_boundary() {
    let (engine, store) = harness();
    engine
        .deploy(boundary_timer_definition(false, "R3/PT1S"))
        .await
        .unwrap();
    let instance_id = engine
        .start_instance("boundary_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let tokens = store.load_tokens_for_instance(instance_id).await.unwrap();
    let parent = tokens.into_iter().find(|t| !t.state.is_terminal()).unwrap();

    for _ in 0..3 {
        let timers = store.load_timers_for_token(parent.id).await.unwrap();
        let due = timers
            .into_iter()
            .find(|t| t.state == TimerState::Scheduled)
            .expect("a scheduled boundary timer");
        engine.handle_timer_fired(due.id).await.unwrap();
    }

    // No fourth iteration is scheduled once the repeat budget is spent.
    let remaining = store.load_timers_for_token(parent.id).await.unwrap();
    assert!(remaining.iter().all(|t| t.state != TimerState::Scheduled));

    let tokens_after = store.load_tokens_for_instance(instance_id).await.unwrap();
    let spawned: Vec<_> = tokens_after
        .iter()
        .filter(|t| t.parent_token_id == Some(parent.id))
        .collect();
    assert_eq!(spawned.len(), 3);
    assert!(spawned.iter().all(|t| t.current_element_id == "end2"));
    assert!(spawned.iter().all(|t| t.state == TokenState::Completed));

    let parent_after = tokens_after.iter().find(|t| t.id == parent.id).unwrap();
    assert_eq!(parent_after.state, TokenState::Waiting);
    assert!(matches!(parent_after.waiting_for, Some(WaitingFor::Job(_))));

    // Instance as a whole is still active: the parent token never terminated.
    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Active);
}

// ── D / E. Message correlation race ──

fn message_catch_definition() -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f1".into()];
    elements.insert(start.id.clone(), start);
    elements.insert("f1".into(), flow("f1", "catch1"));

    let mut catch = Element::new("catch1", ElementType::IntermediateCatchEvent);
    catch.outgoing = vec!["f2".into()];
    let mut def = EventDefinition::none();
    def.kind = EventDefinitionType::Message;
    def.message_name = Some("M".into());
    def.correlation_key = Some("K".into());
    catch.event_definitions = vec![def];
    elements.insert(catch.id.clone(), catch);
    elements.insert("f2".into(), flow("f2", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    ProcessDefinition {
        process_id: "msg_proc".into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn scenario_d_publish_before_subscribe() {
    let (engine, _store) = harness();
    engine.deploy(message_catch_definition()).await.unwrap();

    let mut vars = Value::empty_object();
    vars.set_path("x", Value::from(1.0));
    engine.publish_message("M", "K", vars).await.unwrap();

    let instance_id = engine
        .start_instance("msg_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    let token = &inspection.tokens[0];
    assert_eq!(token.variables.get_path("data.x"), Some(&Value::Number(1.0)));
}

#[tokio::test]
async fn scenario_e_subscribe_before_publish() {
    let (engine, store) = harness();
    engine.deploy(message_catch_definition()).await.unwrap();

    let instance_id = engine
        .start_instance("msg_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let subs = store.subscriptions_for_instance(instance_id).await.unwrap();
    assert_eq!(subs.len(), 1);

    let mut vars = Value::empty_object();
    vars.set_path("x", Value::from(2.0));
    engine.publish_message("M", "K", vars).await.unwrap();

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    let token = &inspection.tokens[0];
    assert_eq!(token.variables.get_path("data.x"), Some(&Value::Number(2.0)));
    assert_eq!(
        token.variables.get_path("_correlatedBy"),
        Some(&Value::String("message".into()))
    );
    assert_eq!(
        token.variables.get_path("_message_correlated"),
        Some(&Value::Bool(true))
    );
    assert_eq!(
        token.variables.get_path("_correlation_key"),
        Some(&Value::String("K".into()))
    );
    assert!(token.variables.get_path("_message_id").is_some());

    let subs_after = store.subscriptions_for_instance(instance_id).await.unwrap();
    assert!(subs_after.is_empty());
}

// ── F / G. Error boundary ──

fn error_boundary_definition(boundary_error_code: Option<&str>) -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f1".into()];
    elements.insert(start.id.clone(), start);
    elements.insert("f1".into(), flow("f1", "task1"));

    let mut task = Element::new("task1", ElementType::ServiceTask);
    task.outgoing = vec!["f2".into()];
    task.task_definition = Some(TaskDefinition {
        task_type: "X".into(),
        retries: 3,
    });
    elements.insert(task.id.clone(), task);
    elements.insert("f2".into(), flow("f2", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    if let Some(code) = boundary_error_code {
        let mut boundary = Element::new("boundary1", ElementType::BoundaryEvent);
        boundary.attached_to_ref = Some("task1".into());
        boundary.cancel_activity = Some(true);
        let mut def = EventDefinition::none();
        def.kind = EventDefinitionType::Error;
        def.error_code = Some(code.to_string());
        boundary.event_definitions = vec![def];
        boundary.outgoing = vec!["f3".into()];
        elements.insert(boundary.id.clone(), boundary);
        elements.insert("f3".into(), flow("f3", "end2"));
        elements.insert("end2".into(), Element::new("end2", ElementType::EndEvent));
    }

    ProcessDefinition {
        process_id: "error_proc".into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn scenario_f_error_boundary_match() {
    let (engine, store) = harness();
    engine
        .deploy(error_boundary_definition(Some("PAYMENT_DECLINED")))
        .await
        .unwrap();
    let instance_id = engine
        .start_instance("error_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let jobs = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs.len(), 1);

    let mut vars = Value::empty_object();
    vars.set_path("reason", Value::from("nsf"));
    engine
        .handle_job_thrown_error(&jobs[0].key, "PAYMENT_DECLINED", None, Some(vars))
        .await
        .unwrap();

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    assert!(inspection.incidents.is_empty());
    let token = &inspection.tokens[0];
    assert_eq!(token.current_element_id, "end2");
    assert_eq!(
        token.variables.get_path("reason"),
        Some(&Value::String("nsf".into()))
    );
}

#[tokio::test]
async fn scenario_g_unhandled_error_opens_incident() {
    let (engine, store) = harness();
    engine.deploy(error_boundary_definition(None)).await.unwrap();
    let instance_id = engine
        .start_instance("error_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let jobs = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs.len(), 1);

    engine
        .handle_job_thrown_error(&jobs[0].key, "UNKNOWN", None, None)
        .await
        .unwrap();

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Failed);
    assert_eq!(inspection.incidents.len(), 1);
    assert_eq!(
        inspection.incidents[0].incident_type,
        IncidentType::UnhandledBpmnError
    );
    assert_eq!(inspection.incidents[0].error_code.as_deref(), Some("UNKNOWN"));
    let token = &inspection.tokens[0];
    assert_eq!(token.state, TokenState::Failed);
}

// ── H. Parallel fork/join ──

fn parallel_definition() -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f0".into()];
    elements.insert(start.id.clone(), start);
    elements.insert("f0".into(), flow("f0", "fork"));

    let mut fork = Element::new("fork", ElementType::ParallelGateway);
    fork.incoming = vec!["f0".into()];
    fork.outgoing = vec!["fA".into(), "fB".into()];
    elements.insert(fork.id.clone(), fork);
    elements.insert("fA".into(), flow("fA", "taskA"));
    elements.insert("fB".into(), flow("fB", "taskB"));

    let mut task_a = Element::new("taskA", ElementType::ServiceTask);
    task_a.outgoing = vec!["fAJ".into()];
    task_a.task_definition = Some(TaskDefinition {
        task_type: "doA".into(),
        retries: 3,
    });
    elements.insert(task_a.id.clone(), task_a);
    elements.insert("fAJ".into(), flow("fAJ", "join"));

    let mut task_b = Element::new("taskB", ElementType::ServiceTask);
    task_b.outgoing = vec!["fBJ".into()];
    task_b.task_definition = Some(TaskDefinition {
        task_type: "doB".into(),
        retries: 3,
    });
    elements.insert(task_b.id.clone(), task_b);
    elements.insert("fBJ".into(), flow("fBJ", "join"));

    let mut join = Element::new("join", ElementType::ParallelGateway);
    join.incoming = vec!["fAJ".into(), "fBJ".into()];
    join.outgoing = vec!["fEnd".into()];
    elements.insert(join.id.clone(), join);
    elements.insert("fEnd".into(), flow("fEnd", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    ProcessDefinition {
        process_id: "parallel_proc".into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn scenario_h_parallel_fork_join() {
    let (engine, store) = harness();
    engine.deploy(parallel_definition()).await.unwrap();
    let instance_id = engine
        .start_instance("parallel_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let jobs = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs.len(), 2);

    for job in &jobs {
        let mut vars = Value::empty_object();
        if job.job_type == "doA" {
            vars.set_path("a", Value::from(1.0));
        } else {
            vars.set_path("b", Value::from(2.0));
        }
        engine.handle_job_completed(&job.key, vars).await.unwrap();
    }

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Completed);
    let live: Vec<_> = inspection
        .tokens
        .iter()
        .filter(|t| t.current_element_id == "end")
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].variables.get_path("a"), Some(&Value::Number(1.0)));
    assert_eq!(live[0].variables.get_path("b"), Some(&Value::Number(2.0)));
}

// ── Deployment-time message start event ──

fn message_start_definition() -> ProcessDefinition {
    let mut elements = BTreeMap::new();
    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["f1".into()];
    let mut def = EventDefinition::none();
    def.kind = EventDefinitionType::Message;
    def.message_name = Some("Kickoff".into());
    start.event_definitions = vec![def];
    elements.insert(start.id.clone(), start);
    elements.insert("f1".into(), flow("f1", "end"));
    elements.insert("end".into(), Element::new("end", ElementType::EndEvent));

    ProcessDefinition {
        process_id: "triggered_proc".into(),
        version: 1,
        elements,
    }
}

#[tokio::test]
async fn deploy_registers_message_start_subscription_and_publish_starts_instance() {
    let (engine, store) = harness();
    engine.deploy(message_start_definition()).await.unwrap();

    let subs = store.find_active_subscriptions("Kickoff").await.unwrap();
    assert_eq!(subs.len(), 1);
    assert!(subs[0].is_start_event());

    engine
        .publish_message("Kickoff", "", Value::empty_object())
        .await
        .unwrap();

    // A message start-event subscription is reusable: it can trigger a fresh
    // instance on every matching publish, so it is never consumed/removed.
    let subs_after = store.find_active_subscriptions("Kickoff").await.unwrap();
    assert_eq!(subs_after.len(), 1);
}

// ── Cancellation tears down jobs and boundary state ──

#[tokio::test]
async fn cancel_instance_deletes_pending_job() {
    let (engine, store) = harness();
    engine.deploy(linear_definition("cancel_proc", "X")).await.unwrap();
    let instance_id = engine
        .start_instance("cancel_proc", 1, Value::empty_object())
        .await
        .unwrap();

    let jobs = store.jobs_for_instance(instance_id).await.unwrap();
    assert_eq!(jobs.len(), 1);

    engine.cancel_instance(instance_id).await.unwrap();

    let jobs_after = store.jobs_for_instance(instance_id).await.unwrap();
    assert!(jobs_after.is_empty());

    let inspection = engine.inspect(instance_id).await.unwrap();
    assert_eq!(inspection.state, InstanceState::Canceled);
    assert!(inspection.tokens.iter().all(|t| t.state == TokenState::Canceled));
}
