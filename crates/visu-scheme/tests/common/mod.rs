#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::Message;

/// One frame received by the fake data module server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub module: String,
    pub text: String,
}

/// WebSocket server that answers on `/ws/{module}` through `reply`.
pub struct DataModuleServer {
    pub ws_url: String,
    pub frames: Receiver<Received>,
}

pub fn start_data_module_server<F>(reply: F) -> DataModuleServer
where
    F: Fn(&str, &str) -> Vec<String> + Send + Sync + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind data module server");
    let port = listener.local_addr().expect("local addr").port();
    let (frames_tx, frames_rx) = unbounded();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else {
                continue;
            };
            let frames = frames_tx.clone();
            let reply = reply.clone();
            thread::spawn(move || serve(stream, &frames, &reply));
        }
    });
    DataModuleServer {
        ws_url: format!("ws://127.0.0.1:{port}/ws"),
        frames: frames_rx,
    }
}

fn serve<F>(stream: std::net::TcpStream, frames: &Sender<Received>, reply: &F)
where
    F: Fn(&str, &str) -> Vec<String>,
{
    let mut path = String::new();
    let capture_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    };
    let Ok(mut socket) = tungstenite::accept_hdr(stream, capture_path) else {
        return;
    };
    let module = path.trim_start_matches("/ws/").to_string();
    loop {
        let text = match socket.read() {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Close(_)) | Err(_) => return,
            Ok(_) => continue,
        };
        let _ = frames.send(Received {
            module: module.clone(),
            text: text.clone(),
        });
        for answer in reply(&module, &text) {
            if socket.send(Message::text(answer)).is_err() {
                return;
            }
        }
    }
}

/// Collects frames until `done` holds or the timeout expires.
pub fn collect_until(
    frames: &Receiver<Received>,
    timeout: Duration,
    mut done: impl FnMut(&[Received]) -> bool,
) -> Vec<Received> {
    let deadline = std::time::Instant::now() + timeout;
    let mut seen = Vec::new();
    while !done(&seen) {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match frames.recv_timeout(remaining) {
            Ok(frame) => seen.push(frame),
            Err(_) => break,
        }
    }
    seen
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{stamp}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
