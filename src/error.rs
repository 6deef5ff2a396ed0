use std::io;
use std::path::PathBuf;

/// Failures surfaced by the store, node and dispatcher layers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file type {0} is not supported")]
    UnsupportedType(String),

    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage node {node} is unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
