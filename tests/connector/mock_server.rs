// ABOUTME: In-process mock connector server for integration tests
//
// Provides:
// - MockServer: TCP listener speaking the upgrade handshake and frame codec
// - Behavior: how the server answers once a client has connected

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gridconn::connector::codec::{self, Frame, ResponseFrame};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the mock answers a client
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Accept the upgrade and echo every request back
    Echo,
    /// Accept the upgrade and never answer
    Silent,
    /// Accept the upgrade, then hang up
    HangUp,
    /// Refuse the upgrade with this status text and a small body
    Reject(&'static str),
}

pub struct MockServer {
    pub endpoint: String,
    accepted: Arc<AtomicUsize>,
    handshakes: Arc<Mutex<Vec<Vec<String>>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let accepted = Arc::clone(&accepted);
            let handshakes = Arc::clone(&handshakes);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let handshakes = Arc::clone(&handshakes);
                    tokio::spawn(serve(socket, behavior, handshakes));
                }
            })
        };

        Self {
            endpoint,
            accepted,
            handshakes,
            task,
        }
    }

    /// Number of TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Request lines of every handshake received, without line endings
    pub fn handshakes(&self) -> Vec<Vec<String>> {
        self.handshakes.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, behavior: Behavior, handshakes: Arc<Mutex<Vec<Vec<String>>>>) {
    let mut stream = BufReader::new(socket);

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.is_empty() {
            break;
        }
        lines.push(line);
    }
    handshakes.lock().unwrap().push(lines);

    if let Behavior::Reject(status) = behavior {
        let body = "upgrade refused";
        let response = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\n\r\n{body}", body.len());
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        return;
    }

    let accept = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: GRIDAPICONNECTOR\r\nConnection: Upgrade\r\n\r\n";
    if stream.write_all(accept.as_bytes()).await.is_err() {
        return;
    }

    if matches!(behavior, Behavior::HangUp) {
        return;
    }

    while let Ok(frame) = codec::decode_request(&mut stream, 1024 * 1024).await {
        let Frame::Data(request) = frame else {
            continue;
        };
        if matches!(behavior, Behavior::Silent) {
            continue;
        }
        let payload: Value = serde_json::from_str(&request.payload).unwrap_or(Value::Null);
        let reply = ResponseFrame {
            target: request.target,
            payload: json!({ "request_type": request.request_type, "payload": payload }).to_string(),
        };
        if codec::encode_response(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}
