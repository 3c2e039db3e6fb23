use kodi_mock_server::config::MockConfig;
use kodi_mock_server::rpc::Dispatcher;
use kodi_mock_server::{HandlerSet, MockTcpServer};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A started server on a loopback port plus the handler set behind it.
pub struct TestHarness {
    pub server: MockTcpServer,
    pub handlers: HandlerSet,
    pub addr: SocketAddr,
}

impl TestHarness {
    pub fn start() -> Self {
        Self::start_with(MockConfig::default())
    }

    pub fn start_with(mut config: MockConfig) -> Self {
        config.server.poll_interval_ms = 10;
        config.harness.wait_poll_interval_ms = 5;

        let dispatcher = Arc::new(Dispatcher::with_poll_interval(config.wait_poll_interval()));
        let handlers = HandlerSet::new();
        handlers.register_all(&dispatcher);

        let server = MockTcpServer::with_config(config, dispatcher);
        let addr = server.start().expect("server starts");
        Self {
            server,
            handlers,
            addr,
        }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.server.dispatcher()
    }
}

/// Line-oriented client speaking the mock's raw-TCP dialect.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    pub async fn request(&mut self, id: i64, method: &str, params: Value) {
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_raw(&frame.to_string()).await;
    }

    /// Next decoded message, or `None` if nothing arrives within `timeout`.
    pub async fn next_message(&mut self, timeout: Duration) -> Option<Value> {
        let line = tokio::time::timeout(timeout, self.lines.next_line())
            .await
            .ok()?
            .ok()??;
        Some(serde_json::from_str(&line).expect("server sends valid JSON"))
    }

    /// Read until a message matches, returning everything read on the way.
    pub async fn read_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Value) -> bool,
    ) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(message) = self.next_message(remaining).await else {
                return seen;
            };
            let finished = done(&message);
            seen.push(message);
            if finished {
                return seen;
            }
        }
    }

    pub async fn response(&mut self, id: i64) -> Value {
        let seen = self.read_until(TIMEOUT, |message| message["id"] == id).await;
        seen.into_iter()
            .find(|message| message["id"] == id)
            .unwrap_or_else(|| panic!("no response for id {id}"))
    }
}

pub fn methods(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| message["method"].as_str().map(str::to_string))
        .collect()
}
