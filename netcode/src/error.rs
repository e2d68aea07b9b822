use crate::session::SessionPhase;
use crate::transport::ConnectionStatus;
use shared::CodecError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Start or connect while a server or connection is already up.
    #[error("transport already active ({0:?})")]
    AlreadyActive(ConnectionStatus),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("no async runtime available to drive sockets")]
    NoRuntime,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already active in phase {0:?}")]
    AlreadyActive(SessionPhase),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("config file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
