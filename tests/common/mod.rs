//! Test harness: a real server on an ephemeral port and a raw HTTP/1.1 client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use xstats::{Error, Record, Registry, Router, Server};

pub struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    /// Serves `router` on `127.0.0.1:0`. IPv4 explicitly, so the recorded
    /// client address is predictable.
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();

        let task = tokio::spawn(Server::from_listener(listener).serve_with_shutdown(router, async {
            let _ = signal.await;
        }));

        Self { addr, shutdown, task }
    }

    /// Sends one request on a fresh connection and returns the status code.
    pub async fn send(&self, method: &str, target: &str, body: &str) -> u16 {
        let head = format!(
            "{method} {target} HTTP/1.1\r\nhost: {}\r\nconnection: close\r\ncontent-length: {}\r\n\r\n",
            self.addr,
            body.len(),
        );
        self.send_raw(&head, body, Duration::ZERO).await
    }

    /// Writes `head`, waits `pause`, then writes `rest` and reads the whole
    /// response. `head` must carry its own framing headers.
    pub async fn send_raw(&self, head: &str, rest: &str, pause: Duration) -> u16 {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(head.as_bytes()).await.unwrap();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        stream.write_all(rest.as_bytes()).await.unwrap();

        // The server may close right after a rejection; keep what arrived.
        let mut raw = Vec::new();
        let _ = stream.read_to_end(&mut raw).await;
        let text = String::from_utf8_lossy(&raw);
        text.split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or_else(|| panic!("malformed response: {text:?}"))
    }

    pub async fn get(&self, target: &str) -> u16 {
        self.send("GET", target, "").await
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

/// Registers an observer on `registry` that forwards every record.
pub fn records(registry: &Registry) -> mpsc::UnboundedReceiver<Record> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.on_record(move |record| {
        let _ = tx.send(record.clone());
        Ok(())
    });
    rx
}

/// The next delivered record. Records arrive once hyper releases the response
/// body, which may be just after the client has read it.
pub async fn next_record(rx: &mut mpsc::UnboundedReceiver<Record>) -> Record {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no record delivered")
        .expect("observer channel closed")
}

/// Asserts nothing else arrives within a short grace period.
pub async fn assert_no_more_records(rx: &mut mpsc::UnboundedReceiver<Record>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra record: {extra:?}");
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}
