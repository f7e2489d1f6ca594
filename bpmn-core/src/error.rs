use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the Engine's public operations (spec §7).
///
/// Internal plumbing (store access, executor helpers) keeps using
/// `anyhow::Result` exactly as the teacher does; this enum exists at the
/// boundary callers actually need to match on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("process definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("process definition {0} has no eligible start event")]
    NoStartEvent(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("no executor registered for element type: {0}")]
    NoExecutor(String),

    #[error("execution error on element {element}: {message}")]
    ExecutionError { element: String, message: String },

    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("token not found: {0}")]
    TokenNotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
