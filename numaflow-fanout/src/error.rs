use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error any user operation may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Failure raised by the user supplied operation. It is shared so the same failure can be
    /// reported by both `wait()` and the result stream.
    #[error("Operation Error - {0}")]
    Operation(Arc<dyn std::error::Error + Send + Sync>),

    #[error("Offload Error - {0}")]
    Offload(String),

    #[error("Task Error - {0}")]
    Task(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Run was cancelled before all the results were produced")]
    Cancelled,

    #[error("Results were already taken from the handle")]
    ResultsTaken,
}

impl Error {
    /// Wraps a failure returned by the user operation.
    pub fn operation(err: impl Into<BoxError>) -> Self {
        Error::Operation(Arc::from(err.into()))
    }
}
