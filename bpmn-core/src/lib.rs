//! `bpmn-core`: a BPMN 2.0 workflow execution engine. A process definition
//! is compiled elsewhere (or hand-authored as JSON, spec §6) and deployed
//! through [`Engine::deploy`]; the engine then drives tokens through a
//! definition's elements, parking them on jobs, timers, and message/signal
//! waits until external events (`Engine::handle_*`) resume them.

pub mod boundary;
pub mod correlation;
pub mod definition;
pub mod engine;
pub mod error;
pub mod events;
pub mod executors;
pub mod expr;
pub mod http_client;
pub mod incident;
pub mod instance;
pub mod job;
pub mod message;
pub mod processor;
pub mod store;
pub mod store_memory;
#[cfg(feature = "postgres")]
pub mod store_postgres;
pub mod timer;
pub mod timer_wheel;
pub mod token;
pub mod value;

pub use engine::{Engine, InstanceInspection};
pub use error::{EngineError, EngineResult};
