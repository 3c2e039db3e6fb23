//! Errors surfaced to the code that owns a mock server.
//!
//! Transport, decode and unimplemented-method conditions never show up
//! here: they are logged and swallowed where they happen so the server keeps
//! running for the whole test suite. Only API misuse and explicit wait
//! timeouts are reported to the caller.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Lifecycle state names used in [`ServerError::InvalidState`].
pub const STATE_IDLE: &str = "not started";
pub const STATE_RUNNING: &str = "running";
pub const STATE_STOPPED: &str = "stopped";

#[derive(Debug, Error)]
pub enum ServerError {
    /// The owning test called a lifecycle operation out of order.
    #[error("cannot {operation}: server is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server tasks did not finish within {0:?} of shutdown")]
    ShutdownTimeout(Duration),

    #[error("invalid server configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A harness wait ran past its deadline without observing the event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for method {method} to be handled")]
    MethodTimeout { method: String, timeout: Duration },

    #[error("timed out after {timeout:?} waiting for notification {method}")]
    NotificationTimeout { method: String, timeout: Duration },
}

impl WaitError {
    /// Name of the method or notification the wait was watching for.
    pub fn method(&self) -> &str {
        match self {
            WaitError::MethodTimeout { method, .. } => method,
            WaitError::NotificationTimeout { method, .. } => method,
        }
    }
}
