//! IPC layer for homegated
//!
//! Provides:
//! - Unix domain socket server with per-client reader/writer tasks
//! - NDJSON (newline-delimited JSON) protocol
//! - Event fan-out to subscribed clients
//! - Peer UID authentication mapped to a [`homegate_api::ClientRole`]

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer speaks a different protocol version
    #[error("API version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Server error: {0}")]
    ServerError(String),
}

impl IpcError {
    /// True when the daemon is unreachable or went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            IpcError::ConnectionClosed => true,
            IpcError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;
