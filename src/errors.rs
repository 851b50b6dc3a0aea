use std::{
    error::Error as StdError,
    fmt,
    io,
    sync::Arc,
};


/// Ошибки создания пула
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("max_threads ({max}) must not be less than min_threads ({min})")]
    MaxBelowMin { max: usize, min: usize },
    #[error("min_threads must be at least 1")]
    MinBelowOne,
    #[error("idle timeout must not be negative, got {0}s")]
    NegativeIdleTimeout(i64),
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
}

/// Ошибки очереди приоритетов
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum QueueError {
    #[error("priority `Invalid` cannot be stored in the queue")]
    InvalidPriority,
    #[error("queue is empty")]
    Empty,
    #[error("handle does not refer to a queued item")]
    StaleHandle,
}

pub type PoolResult<T> = Result<T, PoolError>;


#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum WorkErrorKind {
    FunctionNotFound,
    InvalidInput,
    Failed,
    Panicked,
    Cancelled,
    Timeout,
}

impl fmt::Display for WorkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkErrorKind::FunctionNotFound => "function not found",
            WorkErrorKind::InvalidInput => "invalid input",
            WorkErrorKind::Failed => "failed",
            WorkErrorKind::Panicked => "panicked",
            WorkErrorKind::Cancelled => "cancelled",
            WorkErrorKind::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Ошибка выполнения задачи: вид + сообщение + (опционально) первопричина.
///
/// Заполняется исполняющим потоком до вызова `WorkItem::complete`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorkError {
    kind: WorkErrorKind,
    message: String,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl WorkError {
    pub fn new(kind: WorkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(WorkErrorKind::Failed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(WorkErrorKind::InvalidInput, message)
    }

    pub fn cancelled() -> Self {
        Self::new(WorkErrorKind::Cancelled, "work cancelled itself")
    }

    pub(crate) fn function_not_found(group: &str, name: &str) -> Self {
        Self::new(
            WorkErrorKind::FunctionNotFound,
            format!("no work function registered for {}/{}", group, name),
        )
    }

    /// Переводит payload паники из `catch_unwind` в ошибку
    pub(crate) fn panicked(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic in work function".to_string()
        };
        Self::new(WorkErrorKind::Panicked, message)
    }

    #[inline]
    pub fn kind(&self) -> WorkErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}
