use thiserror::Error;

pub mod container;
pub mod keyhash;
pub mod resp;
pub mod urls;

pub use container::Container;
pub use keyhash::{key_hash, KeyHash, KEY_HASH_SIZE};

/// Maximum key size in bytes; the container layout stores the key length
/// in a 16-bit field.
pub const MAX_KEY_SIZE: usize = 65535;

/// Error types for MeshKV operations
#[derive(Debug, Error)]
pub enum MeshKvError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Container frame too short: need {needed} bytes, got {got}")]
    ShortFrame { needed: usize, got: usize },

    #[error("Reconciliation failed: {0}")]
    Reconcile(String),
}

/// Result type for MeshKV operations
pub type Result<T> = std::result::Result<T, MeshKvError>;
