//! Control Plane Error Hierarchy
//!
//! Low-level coordination-store failures are translated into [`StoreError`]
//! at the `ConfigStore` boundary. Everything above that layer reports through
//! the crate-wide [`Error`].

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Result type of every `ConfigStore` operation and async completion.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Coordination store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed or incomplete JSON documents
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Settings could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Settings were loaded but are inconsistent
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// One sub-fetch of a multi-part routing record failed, the whole record was discarded
    #[error("Channel {channel_id} discarded: {reason}")]
    PartialGather { channel_id: u32, reason: String },

    /// A gather ticket was not settled in time
    #[error("Channel {channel_id} load still pending after {waited:?}")]
    GatherTimeout { channel_id: u32, waited: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transport-level failure, the session is not connected
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// Expected absence of a node
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    /// Key is not an absolute slash-delimited path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NodeNotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Malformed JSON
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON with missing or out-of-range fields
    #[error("Invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

impl SchemaError {
    pub(crate) fn invalid(
        what: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        SchemaError::Invalid {
            what,
            reason: reason.into(),
        }
    }
}
