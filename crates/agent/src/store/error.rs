use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("append to {path} failed after {attempts} attempts: {source}")]
    AppendContention {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown record schema, discarded")]
    UnknownSchema,
}

pub type StoreResult<T> = Result<T, StoreError>;
