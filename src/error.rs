//! Typed error kinds for the engine.
//!
//! Component-local recovery is preferred everywhere; only the startup
//! conditions called out below are meant to terminate the process (see
//! `main.rs`). Every other variant is surfaced to its caller (an HTTP
//! response, a wire-protocol close, a log line) and the engine keeps
//! running.

use thiserror::Error;

/// Stable, machine-readable error kind plus a human message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config store unavailable: {0}")]
    ConfigUnwritable(String),

    #[error("listener port already in use: {0}")]
    PortInUse(u16),

    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("transport refused: {0}")]
    TransportRefused(String),

    #[error("transport reset: {0}")]
    TransportReset(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("storage I/O error: {0}")]
    StorageIoError(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(i64),

    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::StorageIoError(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::StorageIoError(e.to_string())
    }
}
