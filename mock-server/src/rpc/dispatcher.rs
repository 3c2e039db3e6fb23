//! Routes decoded requests to their owning handler and merges everything
//! waiting to go out (responses first, then notifications) into one batch
//! of newline-terminated JSON.
//!
//! One dispatcher belongs to one server instance and is shared by reference
//! with every connection task and with the owning test.

use crate::error::WaitError;
use crate::lock;
use crate::rpc::handler::{ConnectionHandler, DEFAULT_WAIT_POLL_INTERVAL};
use crate::transport::JsonRpcRequest;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Tracking entry for one request id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodPendingState {
    pub method: String,
    /// Set once the response for this id has been drained for writing.
    pub handled: bool,
}

#[derive(Default)]
struct Registry {
    by_method: HashMap<String, Arc<dyn ConnectionHandler>>,
    /// Registration order, used to drain notifications deterministically.
    order: Vec<Arc<dyn ConnectionHandler>>,
}

pub struct Dispatcher {
    registry: RwLock<Registry>,
    method_ids: Mutex<HashMap<i64, MethodPendingState>>,
    responses: Mutex<BTreeMap<i64, Vec<crate::transport::JsonRpcResponse>>>,
    /// Ids whose handler is running right now. Lock order: `in_flight`, then `responses`.
    in_flight: Mutex<HashSet<i64>>,
    notifications_seen: Mutex<HashSet<String>>,
    wait_poll_interval: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_WAIT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(wait_poll_interval: Duration) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            method_ids: Mutex::new(HashMap::new()),
            responses: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            notifications_seen: Mutex::new(HashSet::new()),
            wait_poll_interval: wait_poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Install `handler` as owner of every method it declares. A later
    /// registration for the same method replaces the earlier owner.
    pub fn register(&self, handler: Arc<dyn ConnectionHandler>) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for method in handler.supported_methods() {
            if let Some(previous) = registry.by_method.insert(method.to_string(), handler.clone()) {
                if !same_handler(&previous, &handler) {
                    debug!(
                        method,
                        previous = previous.name(),
                        handler = handler.name(),
                        "method owner replaced"
                    );
                }
            }
        }
        if !registry.order.iter().any(|known| same_handler(known, &handler)) {
            registry.order.push(handler);
        }
    }

    pub fn handler_for(&self, method: &str) -> Option<Arc<dyn ConnectionHandler>> {
        self.read_registry().by_method.get(method).cloned()
    }

    /// Decode one frame and run it through its owning handler.
    pub fn on_frame_received(&self, raw: &str) {
        let request: JsonRpcRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, frame = %raw, "failed to decode frame");
                return;
            }
        };
        if request.jsonrpc != "2.0" {
            warn!(version = %request.jsonrpc, frame = %raw, "invalid JSON-RPC version");
            return;
        }
        self.dispatch(request);
    }

    /// Route an already decoded request.
    pub fn dispatch(&self, request: JsonRpcRequest) {
        let method = request.method.clone();

        let Some(id) = request.id else {
            // Fire-and-forget: run for side effects, nothing to correlate.
            match self.handler_for(&method) {
                Some(handler) => {
                    let dropped = handler.handle(&method, &request);
                    trace!(method = %method, dropped = dropped.len(), "request without id handled");
                }
                None => warn!(method = %method, "method not implemented"),
            }
            return;
        };

        lock(&self.method_ids).insert(
            id,
            MethodPendingState {
                method: method.clone(),
                handled: false,
            },
        );

        let Some(_reservation) = self.reserve(id) else {
            debug!(id, method = %method, "response pending, ignoring redelivery");
            return;
        };

        let Some(handler) = self.handler_for(&method) else {
            warn!(id, method = %method, "method not implemented");
            return;
        };

        let responses = handler.handle(&method, &request);
        if responses.is_empty() {
            // Nothing will ever be drained for this id.
            self.mark_handled(id);
            return;
        }

        let mut queue = lock(&self.responses);
        match queue.entry(id) {
            std::collections::btree_map::Entry::Occupied(_) => {
                debug!(id, method = %method, "duplicate response dropped");
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(responses);
            }
        }
    }

    /// Serialize everything waiting to go out. Returns `None` when there is
    /// nothing to write.
    pub fn drain_outbound(&self) -> Option<String> {
        let mut out = String::new();

        let drained = std::mem::take(&mut *lock(&self.responses));
        if !drained.is_empty() {
            let mut method_ids = lock(&self.method_ids);
            for (id, responses) in drained {
                if let Some(state) = method_ids.get_mut(&id) {
                    state.handled = true;
                }
                for response in responses {
                    push_line(&mut out, &response);
                }
            }
        }

        for handler in self.unique_handlers() {
            let notifications = handler.drain_notifications();
            if notifications.is_empty() {
                continue;
            }
            let mut seen = lock(&self.notifications_seen);
            for notification in notifications {
                seen.insert(notification.method.clone());
                push_line(&mut out, &notification);
            }
        }

        if out.is_empty() {
            None
        } else {
            trace!(bytes = out.len(), "outbound batch ready");
            Some(out)
        }
    }

    /// Forget queued responses and all method/notification tracking. Handler
    /// state is left alone.
    pub fn reset(&self) {
        lock(&self.responses).clear();
        lock(&self.method_ids).clear();
        lock(&self.notifications_seen).clear();
    }

    pub fn clear_methods_handled(&self) {
        lock(&self.method_ids).clear();
    }

    pub fn tracked(&self, id: i64) -> Option<MethodPendingState> {
        lock(&self.method_ids).get(&id).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        lock(&self.method_ids).len()
    }

    /// Number of responses queued for `id`.
    pub fn queued_responses(&self, id: i64) -> usize {
        lock(&self.responses).get(&id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_method_handled(&self, method: &str) -> bool {
        lock(&self.method_ids)
            .values()
            .any(|state| state.handled && state.method == method)
    }

    pub fn notification_seen(&self, method: &str) -> bool {
        lock(&self.notifications_seen).contains(method)
    }

    pub async fn wait_for_method_handled(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let started = Instant::now();
        loop {
            if self.is_method_handled(method) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(WaitError::MethodTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.wait_poll_interval).await;
        }
    }

    pub async fn wait_for_notification(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let started = Instant::now();
        loop {
            if self.notification_seen(method) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(WaitError::NotificationTimeout {
                    method: method.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.wait_poll_interval).await;
        }
    }

    /// Claim `id` for processing unless it is already running or answered.
    fn reserve(&self, id: i64) -> Option<Reservation<'_>> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains(&id) || lock(&self.responses).contains_key(&id) {
            return None;
        }
        in_flight.insert(id);
        Some(Reservation {
            in_flight: &self.in_flight,
            id,
        })
    }

    fn mark_handled(&self, id: i64) {
        if let Some(state) = lock(&self.method_ids).get_mut(&id) {
            state.handled = true;
        }
    }

    /// Handlers that still own at least one method, in registration order.
    fn unique_handlers(&self) -> Vec<Arc<dyn ConnectionHandler>> {
        let registry = self.read_registry();
        registry
            .order
            .iter()
            .filter(|handler| {
                registry
                    .by_method
                    .values()
                    .any(|owner| same_handler(owner, handler))
            })
            .cloned()
            .collect()
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases an in-flight id once its responses are queued (or abandoned).
struct Reservation<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.id);
    }
}

fn same_handler(a: &Arc<dyn ConnectionHandler>, b: &Arc<dyn ConnectionHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn push_line<T: Serialize>(out: &mut String, message: &T) {
    match serde_json::to_string(message) {
        Ok(json) => {
            out.push_str(&json);
            out.push('\n');
        }
        Err(err) => warn!(error = %err, "failed to serialize outbound message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handler::{dispatch_method, HandlerBookkeeping, MethodSet};
    use crate::transport::{JsonRpcNotification, JsonRpcResponse};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    type Gate = (mpsc::Sender<()>, mpsc::Receiver<()>);

    #[derive(Clone, Copy)]
    enum CounterMethod {
        Bump,
        Quiet,
    }

    impl MethodSet for CounterMethod {
        const ALL: &'static [Self] = &[CounterMethod::Bump, CounterMethod::Quiet];

        fn name(self) -> &'static str {
            match self {
                CounterMethod::Bump => "Counter.Bump",
                CounterMethod::Quiet => "Counter.Quiet",
            }
        }
    }

    #[derive(Default)]
    struct CounterHandler {
        books: HandlerBookkeeping,
        calls: AtomicUsize,
        /// When set, `Bump` reports entry and then blocks until released.
        gate: Mutex<Option<Gate>>,
    }

    impl ConnectionHandler for CounterHandler {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn supported_methods(&self) -> Vec<&'static str> {
            CounterMethod::names()
        }

        fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
            dispatch_method::<CounterMethod>("counter", &self.books, method, request, |m| match m {
                CounterMethod::Bump => {
                    if let Some((entered, release)) = lock(&self.gate).take() {
                        entered.send(()).unwrap();
                        release.recv().unwrap();
                    }
                    let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    self.books.add_notification(JsonRpcNotification::from_server(
                        "Counter.OnBump",
                        json!({ "calls": calls }),
                    ));
                    Some(Ok(json!(calls)))
                }
                CounterMethod::Quiet => None,
            })
        }

        fn bookkeeping(&self) -> &HandlerBookkeeping {
            &self.books
        }

        fn reset(&self) {
            self.calls.store(0, Ordering::SeqCst);
            self.books.clear();
        }
    }

    fn frame(id: i64, method: &str) -> String {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": {} }).to_string()
    }

    fn lines(batch: &str) -> Vec<Value> {
        batch
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn setup() -> (Dispatcher, Arc<CounterHandler>) {
        let dispatcher = Dispatcher::new();
        let handler = Arc::new(CounterHandler::default());
        dispatcher.register(handler.clone());
        (dispatcher, handler)
    }

    #[test]
    fn frame_is_tracked_once_and_marked_on_drain() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(&frame(1, "Counter.Bump"));

        assert_eq!(dispatcher.tracked_count(), 1);
        assert_eq!(
            dispatcher.tracked(1),
            Some(MethodPendingState {
                method: "Counter.Bump".to_string(),
                handled: false
            })
        );
        assert!(!dispatcher.is_method_handled("Counter.Bump"));

        dispatcher.drain_outbound().unwrap();
        assert!(dispatcher.is_method_handled("Counter.Bump"));
    }

    #[test]
    fn redelivered_frame_is_not_requeued() {
        let (dispatcher, handler) = setup();
        let raw = frame(9, "Counter.Bump");
        dispatcher.on_frame_received(&raw);
        dispatcher.on_frame_received(&raw);

        assert_eq!(dispatcher.queued_responses(9), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let batch = dispatcher.drain_outbound().unwrap();
        let responses: Vec<Value> = lines(&batch)
            .into_iter()
            .filter(|line| line.get("id") == Some(&json!(9)))
            .collect();
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn redelivery_while_handler_runs_is_skipped() {
        let (dispatcher, handler) = setup();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *lock(&handler.gate) = Some((entered_tx, release_rx));

        let dispatcher = Arc::new(dispatcher);
        let raw = frame(6, "Counter.Bump");
        let first = {
            let dispatcher = dispatcher.clone();
            let raw = raw.clone();
            std::thread::spawn(move || dispatcher.on_frame_received(&raw))
        };

        entered_rx.recv().unwrap();
        dispatcher.on_frame_received(&raw);
        release_tx.send(()).unwrap();
        first.join().unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.queued_responses(6), 1);
    }

    #[test]
    fn drained_id_can_be_processed_again() {
        let (dispatcher, handler) = setup();
        let raw = frame(2, "Counter.Bump");
        dispatcher.on_frame_received(&raw);
        dispatcher.drain_outbound();
        dispatcher.on_frame_received(&raw);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.queued_responses(2), 1);
    }

    #[test]
    fn responses_precede_notifications() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(&frame(3, "Counter.Bump"));
        let batch = dispatcher.drain_outbound().unwrap();
        let out = lines(&batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], 3);
        assert_eq!(out[0]["result"], 1);
        assert_eq!(out[1]["method"], "Counter.OnBump");
        assert!(batch.ends_with('\n'));
        assert!(dispatcher.notification_seen("Counter.OnBump"));
    }

    #[test]
    fn empty_drain_returns_none() {
        let (dispatcher, _) = setup();
        assert!(dispatcher.drain_outbound().is_none());
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(r#"{"jsonrpc":"2.0","id":1,"method":}"#);
        assert_eq!(dispatcher.tracked_count(), 0);
        assert!(dispatcher.drain_outbound().is_none());
    }

    #[test]
    fn unknown_method_is_tracked_but_unanswered() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(&frame(4, "Nobody.Home"));
        assert!(dispatcher.tracked(4).is_some());
        assert!(dispatcher.drain_outbound().is_none());
        assert!(!dispatcher.is_method_handled("Nobody.Home"));
    }

    #[test]
    fn unanswered_method_is_handled_immediately() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(&frame(5, "Counter.Quiet"));
        assert!(dispatcher.is_method_handled("Counter.Quiet"));
        assert!(dispatcher.drain_outbound().is_none());
    }

    #[test]
    fn request_without_id_runs_but_is_not_answered() {
        let (dispatcher, handler) = setup();
        dispatcher.on_frame_received(r#"{"jsonrpc":"2.0","method":"Counter.Bump"}"#);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.tracked_count(), 0);
        let out = lines(&dispatcher.drain_outbound().unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["method"], "Counter.OnBump");
    }

    #[test]
    fn last_registration_wins() {
        let (dispatcher, first) = setup();
        let second = Arc::new(CounterHandler::default());
        dispatcher.register(second.clone());

        dispatcher.on_frame_received(&frame(1, "Counter.Bump"));
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);

        // The replaced handler no longer owns anything and is not drained.
        first.books.add_notification(JsonRpcNotification::from_server("Stale.OnX", json!({})));
        let out = lines(&dispatcher.drain_outbound().unwrap());
        assert!(out.iter().all(|line| line["method"] != "Stale.OnX"));
    }

    #[test]
    fn handler_registered_for_many_methods_is_drained_once() {
        let (dispatcher, handler) = setup();
        handler
            .books
            .add_notification(JsonRpcNotification::from_server("Counter.OnPing", json!({})));
        let out = lines(&dispatcher.drain_outbound().unwrap());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn reset_clears_tracking_but_not_handler_state() {
        let (dispatcher, handler) = setup();
        dispatcher.on_frame_received(&frame(1, "Counter.Bump"));
        dispatcher.drain_outbound();
        dispatcher.on_frame_received(&frame(2, "Counter.Bump"));

        dispatcher.reset();
        assert_eq!(dispatcher.tracked_count(), 0);
        assert_eq!(dispatcher.queued_responses(2), 0);
        assert!(!dispatcher.notification_seen("Counter.OnBump"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_methods_handled_keeps_notifications_seen() {
        let (dispatcher, _) = setup();
        dispatcher.on_frame_received(&frame(1, "Counter.Bump"));
        dispatcher.drain_outbound();
        dispatcher.clear_methods_handled();
        assert!(!dispatcher.is_method_handled("Counter.Bump"));
        assert!(dispatcher.notification_seen("Counter.OnBump"));
    }

    #[tokio::test]
    async fn waits_resolve_after_drain() {
        let (dispatcher, _) = setup();
        let dispatcher = Arc::new(dispatcher);
        dispatcher.on_frame_received(&frame(1, "Counter.Bump"));

        let drainer = dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drainer.drain_outbound();
        });

        dispatcher
            .wait_for_method_handled("Counter.Bump", Duration::from_secs(2))
            .await
            .unwrap();
        dispatcher
            .wait_for_notification("Counter.OnBump", Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn waits_time_out_distinctly() {
        let (dispatcher, _) = setup();
        let err = dispatcher
            .wait_for_method_handled("Counter.Bump", Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::MethodTimeout { .. }));

        let err = dispatcher
            .wait_for_notification("Counter.OnBump", Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotificationTimeout { .. }));
    }
}
