//! The capability every simulated JSON-RPC domain implements.

use crate::error::WaitError;
use crate::lock;
use crate::rpc::RpcResult;
use crate::transport::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often harness waits re-check their condition.
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Closed set of method names a handler owns, as a tagged enum.
pub trait MethodSet: Copy + Sized + 'static {
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|method| method.name() == name)
    }

    fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|method| method.name()).collect()
    }
}

/// A simulated server-side domain (Player, Playlist, Application, ...).
///
/// Handlers are shared between the connection tasks and the owning test, so
/// every method takes `&self` and state lives behind interior locks.
pub trait ConnectionHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn supported_methods(&self) -> Vec<&'static str>;

    /// Run one request. May queue notifications as a side effect. Returns
    /// zero or more responses.
    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse>;

    fn bookkeeping(&self) -> &HandlerBookkeeping;

    /// Return and clear pending notifications.
    fn drain_notifications(&self) -> Vec<JsonRpcNotification> {
        self.bookkeeping().drain_notifications()
    }

    /// Restore default simulated state and forget which methods were seen.
    fn reset(&self);
}

/// Notification queue plus the set of methods a handler has run.
#[derive(Debug, Default)]
pub struct HandlerBookkeeping {
    notifications: Mutex<Vec<JsonRpcNotification>>,
    methods_handled: Mutex<HashSet<String>>,
}

impl HandlerBookkeeping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_notification(&self, notification: JsonRpcNotification) {
        debug!(method = %notification.method, "notification queued");
        lock(&self.notifications).push(notification);
    }

    pub fn drain_notifications(&self) -> Vec<JsonRpcNotification> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    pub fn pending_notifications(&self) -> usize {
        lock(&self.notifications).len()
    }

    pub fn mark_handled(&self, method: &str) {
        lock(&self.methods_handled).insert(method.to_string());
    }

    pub fn was_handled(&self, method: &str) -> bool {
        lock(&self.methods_handled).contains(method)
    }

    pub fn clear(&self) {
        lock(&self.notifications).clear();
        lock(&self.methods_handled).clear();
    }

    /// Poll until `method` has been run by this handler.
    pub async fn wait_for_method_handled(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let started = Instant::now();
        loop {
            if self.was_handled(method) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(WaitError::MethodTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(DEFAULT_WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Shared request plumbing for handlers built on a [`MethodSet`].
///
/// `run` returns `None` for a declared method the handler does not
/// implement; that case is logged and answered with nothing. Requests
/// without an id run for their side effects only.
pub fn dispatch_method<M: MethodSet>(
    handler: &str,
    bookkeeping: &HandlerBookkeeping,
    method: &str,
    request: &JsonRpcRequest,
    run: impl FnOnce(M) -> Option<RpcResult<Value>>,
) -> Vec<JsonRpcResponse> {
    let Some(parsed) = M::from_name(method) else {
        warn!(handler, method, "method not implemented");
        return Vec::new();
    };

    debug!(handler, method, id = ?request.id, "handling request");
    let Some(result) = run(parsed) else {
        warn!(handler, method, "method not implemented");
        return Vec::new();
    };
    bookkeeping.mark_handled(method);

    let Some(id) = request.id else {
        return Vec::new();
    };

    let response = match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => {
            debug!(handler, method, code = err.code, error = %err.message, "request failed");
            JsonRpcResponse::error(id, JsonRpcError::from_rpc_error(&err))
        }
    };
    vec![response]
}
