//! Worker-level error type and process exit codes.
//!
//! Mirrors the exit-code contract from the external interfaces design: `0`
//! clean shutdown, `1` fatal configuration error, `2` unrecoverable storage
//! loss (the database connection could not be (re)established).

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl WorkerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::StorageUnavailable(_) => 2,
        }
    }
}
