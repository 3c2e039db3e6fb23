use std::sync::{Mutex, MutexGuard, PoisonError};

pub const APP_NAME: &str = "kodi-mock-server";

pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod models;
pub mod rpc;
pub mod transport;

pub use error::{ServerError, WaitError};
pub use rpc::handlers::{default_handlers, HandlerSet};
pub use rpc::{ConnectionHandler, Dispatcher};
pub use transport::tcp::MockTcpServer;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Lock a mutex, carrying on with the inner value if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
