//! Thin demonstration binary: wires `bpmn-core` to a chosen `ProcessStore`,
//! deploys a sample process definition, starts an instance, and drives it
//! to completion via a tiny in-process worker loop. No transport layer —
//! wire marshaling is out of scope (see DESIGN.md).

use std::collections::BTreeMap;
use std::sync::Arc;

use bpmn_core::definition::{Element, ElementType, ProcessDefinition, TaskDefinition};
use bpmn_core::expr::LiteralEvaluator;
use bpmn_core::http_client::LoopbackHttpClient;
use bpmn_core::store::ProcessStore;
use bpmn_core::store_memory::MemoryStore;
use bpmn_core::value::Value;
use bpmn_core::Engine;
use tracing_subscriber::EnvFilter;

/// CLI/env configuration, following the teacher's `parse_database_url()`
/// pattern: CLI flag takes precedence over the environment variable.
struct Config {
    database_url: Option<String>,
    bind_addr: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            database_url: parse_flag("--database-url").or_else(|| std::env::var("DATABASE_URL").ok()),
            bind_addr: parse_flag("--bind-addr")
                .or_else(|| std::env::var("BIND_ADDR").ok())
                .unwrap_or_else(|| "0.0.0.0:0".to_string()),
        }
    }
}

fn parse_flag(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();

    let store: Arc<dyn ProcessStore> = match config.database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pool = sqlx::PgPool::connect(&url).await?;
            let pg = bpmn_core::store_postgres::PostgresProcessStore::new(pool);
            pg.migrate().await?;
            tracing::info!("Using PostgresProcessStore (migrations applied)");
            Arc::new(pg)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!(
                "--database-url / DATABASE_URL set but postgres feature not enabled, using MemoryStore"
            );
            Arc::new(MemoryStore::new())
        }
        None => {
            tracing::info!("Using MemoryStore (no database URL configured)");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::info!(bind_addr = %config.bind_addr, "no transport bound — this binary is an in-process demonstration harness");

    let engine = Engine::new(
        store.clone(),
        Arc::new(LiteralEvaluator::default()),
        Arc::new(LoopbackHttpClient),
    );

    engine.deploy(sample_definition()).await?;
    let instance_id = engine
        .start_instance("demo_proc", 1, Value::empty_object())
        .await?;
    tracing::info!(%instance_id, "instance started");

    // Drive any jobs the single service task created, to completion.
    let jobs = store.jobs_for_instance(instance_id).await?;
    for job in jobs {
        tracing::info!(job_key = %job.key, job_type = %job.job_type, "completing demo job");
        engine
            .handle_job_completed(&job.key, Value::empty_object())
            .await?;
    }

    let inspection = engine.inspect(instance_id).await?;
    tracing::info!(state = ?inspection.state, "instance finished");

    let events = engine.read_events(instance_id, 0).await?;
    for (seq, event) in events {
        tracing::info!(seq, ?event, "event");
    }

    Ok(())
}

/// A minimal start -> service task -> end process, hand-authored since BPMN
/// XML parsing is out of scope (spec §1).
fn sample_definition() -> ProcessDefinition {
    let mut elements = BTreeMap::new();

    let mut start = Element::new("start", ElementType::StartEvent);
    start.outgoing = vec!["flow1".into()];
    elements.insert(start.id.clone(), start);

    let mut flow1 = Element::new("flow1", ElementType::SequenceFlow);
    flow1.target_ref = Some("do_work".into());
    elements.insert(flow1.id.clone(), flow1);

    let mut task = Element::new("do_work", ElementType::ServiceTask);
    task.outgoing = vec!["flow2".into()];
    task.task_definition = Some(TaskDefinition {
        task_type: "do_work".into(),
        retries: 3,
    });
    elements.insert(task.id.clone(), task);

    let mut flow2 = Element::new("flow2", ElementType::SequenceFlow);
    flow2.target_ref = Some("end".into());
    elements.insert(flow2.id.clone(), flow2);

    let end = Element::new("end", ElementType::EndEvent);
    elements.insert(end.id.clone(), end);

    ProcessDefinition {
        process_id: "demo_proc".into(),
        version: 1,
        elements,
    }
}
