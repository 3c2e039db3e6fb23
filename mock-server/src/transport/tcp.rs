//! The raw-TCP server that impersonates the media server.
//!
//! Each accepted connection gets a reader task, which frames incoming bytes
//! and feeds them to the dispatcher, and a writer task, which drains the
//! dispatcher on a fixed interval. The dispatcher is shared by every
//! connection: the mock serves one remote at a time, and with several
//! connections open each outbound batch goes to whichever writer drains it
//! first.

use crate::config::MockConfig;
use crate::error::{ServerError, WaitError, STATE_IDLE, STATE_RUNNING, STATE_STOPPED};
use crate::frame::{FrameAccumulator, FrameMode};
use crate::lock;
use crate::rpc::{ConnectionHandler, Dispatcher};
use dashmap::DashMap;
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

const READ_BUFFER_BYTES: usize = 8 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running(SocketAddr),
    Stopped(SocketAddr),
}

impl Lifecycle {
    fn name(self) -> &'static str {
        match self {
            Lifecycle::Idle => STATE_IDLE,
            Lifecycle::Running(_) => STATE_RUNNING,
            Lifecycle::Stopped(_) => STATE_STOPPED,
        }
    }
}

/// Per-connection knobs copied out of [`MockConfig`].
#[derive(Clone, Copy, Debug)]
struct ConnectionSettings {
    poll_interval: Duration,
    frame_mode: FrameMode,
    max_frame_bytes: usize,
}

/// What shutdown needs to tear a live connection down.
struct ConnectionHandle {
    peer: SocketAddr,
    /// Second handle on the socket, used only to shut it down.
    socket: Arc<std::net::TcpStream>,
    token: CancellationToken,
}

type Connections = Arc<DashMap<u64, ConnectionHandle>>;

/// Drops a connection from the live set when its reader ends, even by panic.
struct Registration {
    conn_id: u64,
    connections: Connections,
    token: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.connections.remove(&self.conn_id);
        self.token.cancel();
    }
}

pub struct MockTcpServer {
    config: MockConfig,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
    connections: Connections,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl MockTcpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_config(MockConfig::default(), dispatcher)
    }

    pub fn with_config(config: MockConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            lifecycle: Mutex::new(Lifecycle::Idle),
            connections: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bind the configured address and start accepting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let bind = self.config.bind_addr()?;
        self.start_on(bind)
    }

    /// Bind `bind` (port 0 picks a free port) and start accepting.
    ///
    /// A server starts once: calling this again, even after shutdown, fails.
    pub fn start_on(&self, bind: SocketAddr) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = lock(&self.lifecycle);
        if *lifecycle != Lifecycle::Idle {
            return Err(ServerError::InvalidState {
                operation: "start",
                state: lifecycle.name(),
            });
        }

        let listener = std::net::TcpListener::bind(bind)
            .map_err(|source| ServerError::Bind { addr: bind, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let listener = TcpListener::from_std(listener)?;

        let settings = ConnectionSettings {
            poll_interval: self.config.poll_interval(),
            frame_mode: self.config.framing.mode(),
            max_frame_bytes: self.config.framing.max_frame_bytes,
        };
        self.tracker.spawn(accept_loop(
            listener,
            settings,
            self.dispatcher.clone(),
            self.connections.clone(),
            self.tracker.clone(),
            self.shutdown.clone(),
        ));

        *lifecycle = Lifecycle::Running(local_addr);
        info!(addr = %local_addr, "mock server listening");
        Ok(local_addr)
    }

    /// Close every connection and the listener, then wait for all tasks.
    ///
    /// Shutting down a stopped server is a no-op; shutting down one that was
    /// never started is an error.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let local_addr = {
            let mut lifecycle = lock(&self.lifecycle);
            match *lifecycle {
                Lifecycle::Idle => {
                    return Err(ServerError::InvalidState {
                        operation: "shut down",
                        state: STATE_IDLE,
                    })
                }
                Lifecycle::Stopped(_) => return Ok(()),
                Lifecycle::Running(addr) => {
                    *lifecycle = Lifecycle::Stopped(addr);
                    addr
                }
            }
        };

        let closed = self.close_connections();
        self.shutdown.cancel();
        self.tracker.close();

        let timeout = self.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(addr = %local_addr, ?timeout, "server tasks still running after shutdown");
            return Err(ServerError::ShutdownTimeout(timeout));
        }
        info!(addr = %local_addr, connections = closed, "mock server stopped");
        Ok(())
    }

    fn close_connections(&self) -> usize {
        let handles: Vec<(u64, SocketAddr, Arc<std::net::TcpStream>, CancellationToken)> = self
            .connections
            .iter()
            .map(|entry| {
                let handle = entry.value();
                (
                    *entry.key(),
                    handle.peer,
                    handle.socket.clone(),
                    handle.token.clone(),
                )
            })
            .collect();

        for (conn_id, peer, socket, token) in &handles {
            token.cancel();
            if let Err(err) = socket.shutdown(Shutdown::Both) {
                // Peer already gone; keep closing the rest.
                debug!(conn_id, peer = %peer, error = %err, "closing connection failed");
            }
        }
        handles.len()
    }

    fn bound_addr(&self) -> Result<SocketAddr, ServerError> {
        match *lock(&self.lifecycle) {
            Lifecycle::Idle => Err(ServerError::InvalidState {
                operation: "query address",
                state: STATE_IDLE,
            }),
            Lifecycle::Running(addr) | Lifecycle::Stopped(addr) => Ok(addr),
        }
    }

    /// Address the server is (or last was) bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.bound_addr()
    }

    pub fn port(&self) -> Result<u16, ServerError> {
        Ok(self.bound_addr()?.port())
    }

    pub fn host_name(&self) -> Result<String, ServerError> {
        Ok(self.bound_addr()?.ip().to_string())
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.lifecycle), Lifecycle::Running(_))
    }

    /// Number of connections whose reader is still active.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn add_handler(&self, handler: Arc<dyn ConnectionHandler>) {
        self.dispatcher.register(handler);
    }

    pub fn reset(&self) {
        self.dispatcher.reset();
    }

    pub fn clear_methods_handled(&self) {
        self.dispatcher.clear_methods_handled();
    }

    pub async fn wait_for_method_handled(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        self.dispatcher.wait_for_method_handled(method, timeout).await
    }

    pub async fn wait_for_notification(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        self.dispatcher.wait_for_notification(method, timeout).await
    }
}

impl Drop for MockTcpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: ConnectionSettings,
    dispatcher: Arc<Dispatcher>,
    connections: Connections,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    let mut next_conn_id: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_conn_id += 1;
                    let conn_id = next_conn_id;
                    if let Err(err) = spawn_connection(
                        conn_id,
                        stream,
                        peer,
                        settings,
                        &dispatcher,
                        &connections,
                        &tracker,
                        &shutdown,
                    ) {
                        warn!(conn_id, peer = %peer, error = %err, "failed to set up connection");
                    }
                }
                Err(err) if shutdown.is_cancelled() => {
                    debug!(error = %err, "accept interrupted by shutdown");
                    break;
                }
                Err(err) => warn!(error = %err, "failed to accept connection"),
            },
        }
    }
    debug!("accept loop finished");
}

#[allow(clippy::too_many_arguments)]
fn spawn_connection(
    conn_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    settings: ConnectionSettings,
    dispatcher: &Arc<Dispatcher>,
    connections: &Connections,
    tracker: &TaskTracker,
    shutdown: &CancellationToken,
) -> std::io::Result<()> {
    let std_stream = stream.into_std()?;
    let socket = Arc::new(std_stream.try_clone()?);
    let stream = TcpStream::from_std(std_stream)?;
    if let Err(err) = stream.set_nodelay(true) {
        trace!(conn_id, error = %err, "could not disable Nagle");
    }

    let token = shutdown.child_token();
    connections.insert(
        conn_id,
        ConnectionHandle {
            peer,
            socket,
            token: token.clone(),
        },
    );
    info!(conn_id, peer = %peer, "client connected");

    let (reader, writer) = stream.into_split();
    tracker.spawn(write_loop(
        conn_id,
        writer,
        settings.poll_interval,
        dispatcher.clone(),
        token.clone(),
    ));
    tracker.spawn(read_loop(
        conn_id,
        peer,
        reader,
        FrameAccumulator::new(settings.frame_mode, settings.max_frame_bytes),
        dispatcher.clone(),
        connections.clone(),
        token,
    ));
    Ok(())
}

async fn read_loop(
    conn_id: u64,
    peer: SocketAddr,
    mut reader: OwnedReadHalf,
    mut frames: FrameAccumulator,
    dispatcher: Arc<Dispatcher>,
    connections: Connections,
    token: CancellationToken,
) {
    let _registration = Registration {
        conn_id,
        connections,
        token: token.clone(),
    };
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!(conn_id, peer = %peer, "client closed connection");
                    break;
                }
                Ok(n) => {
                    for frame in frames.push_bytes(&buf[..n]) {
                        trace!(conn_id, frame = %frame, "frame received");
                        dispatcher.on_frame_received(&frame);
                    }
                }
                Err(err) => {
                    debug!(conn_id, peer = %peer, error = %err, "read failed");
                    break;
                }
            },
        }
    }

    info!(conn_id, peer = %peer, "client disconnected");
}

async fn write_loop(
    conn_id: u64,
    mut writer: OwnedWriteHalf,
    poll_interval: Duration,
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(batch) = dispatcher.drain_outbound() else {
                    continue;
                };
                trace!(conn_id, bytes = batch.len(), "writing batch");
                if let Err(err) = writer.write_all(batch.as_bytes()).await {
                    debug!(conn_id, error = %err, "write failed");
                    token.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::JsonRpcHandler;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn server() -> MockTcpServer {
        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register(Arc::new(JsonRpcHandler::new()));
        let mut config = MockConfig::default();
        config.server.poll_interval_ms = 10;
        MockTcpServer::with_config(config, dispatcher)
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let server = server();
        assert!(matches!(
            server.shutdown().await,
            Err(ServerError::InvalidState { state: STATE_IDLE, .. })
        ));
        assert!(server.port().is_err());

        let addr = server.start_on(loopback()).unwrap();
        assert!(matches!(
            server.start_on(loopback()),
            Err(ServerError::InvalidState { state: STATE_RUNNING, .. })
        ));
        assert_eq!(server.port().unwrap(), addr.port());
        assert_eq!(server.host_name().unwrap(), "127.0.0.1");

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert_eq!(server.port().unwrap(), addr.port());
        assert!(!server.is_running());
        assert!(matches!(
            server.start_on(loopback()),
            Err(ServerError::InvalidState { state: STATE_STOPPED, .. })
        ));
    }

    #[tokio::test]
    async fn answers_ping_over_tcp() {
        let server = server();
        let addr = server.start_on(loopback()).unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(br#"{"jsonrpc":"2.0","id":1,"method":"JSONRPC.Ping"}"#)
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"], "pong");

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_live_connections() {
        let server = server();
        let addr = server.start_on(loopback()).unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();

        for _ in 0..100 {
            if server.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count(), 1);

        server.shutdown().await.unwrap();
        assert_eq!(server.connection_count(), 0);

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn shutdown_times_out_on_stuck_task() {
        let mut config = MockConfig::default();
        config.server.shutdown_timeout_ms = 50;
        let server = MockTcpServer::with_config(config, Arc::new(Dispatcher::new()));
        server.start_on(loopback()).unwrap();

        // Ignores cancellation entirely.
        server
            .tracker
            .spawn(tokio::time::sleep(Duration::from_secs(30)));

        assert!(matches!(
            server.shutdown().await,
            Err(ServerError::ShutdownTimeout(timeout)) if timeout == Duration::from_millis(50)
        ));
        assert!(!server.is_running());
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn close_connections_continues_past_dead_peers() {
        let server = server();
        let listener = std::net::TcpListener::bind(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut tokens = Vec::new();
        for conn_id in 1..=2u64 {
            let client = std::net::TcpStream::connect(addr).unwrap();
            let (accepted, peer) = listener.accept().unwrap();
            if conn_id == 1 {
                accepted.shutdown(Shutdown::Both).unwrap();
                drop(client);
            }
            let token = CancellationToken::new();
            tokens.push(token.clone());
            server.connections.insert(
                conn_id,
                ConnectionHandle {
                    peer,
                    socket: Arc::new(accepted),
                    token,
                },
            );
        }

        assert_eq!(server.close_connections(), 2);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test]
    async fn reader_exit_removes_connection() {
        let server = server();
        let addr = server.start_on(loopback()).unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        for _ in 0..100 {
            if server.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count(), 1);

        drop(stream);
        for _ in 0..100 {
            if server.connection_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.connection_count(), 0);
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn start_reports_bad_bind_config() {
        let mut config = MockConfig::default();
        config.server.bind = "not-an-address".to_string();
        let server = MockTcpServer::with_config(config, Arc::new(Dispatcher::new()));
        assert!(matches!(server.start(), Err(ServerError::Config(_))));
    }
}
