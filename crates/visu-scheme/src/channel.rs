//! Per-module telemetry channel.
//!
//! A channel is split in two halves. The socket worker thread owns the
//! connection: it drains queued outbound frames and forwards inbound frames
//! as [`ChannelEvent`]s. The [`TelemetryChannel`] half lives on the session
//! thread and holds the subscription state: it sends the `cov` subscription
//! once the socket is open and the `get` polls on every interval tick.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde_json::Value;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::aggregate::ModuleGroup;
use crate::cancel::CancelToken;
use crate::error::SchemeError;
use crate::protocol::{Command, Inbound};

/// Result of one receive attempt on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Text(String),
    /// Nothing arrived before the read timeout.
    Idle,
    Closed,
}

/// An open duplex connection to one data module.
pub trait Connection: Send {
    fn send_text(&mut self, text: &str) -> Result<(), SchemeError>;

    /// Waits at most the connection read timeout for the next frame.
    fn receive(&mut self) -> Result<Received, SchemeError>;

    fn close(&mut self);
}

/// Opens connections to data modules.
pub trait Connector: Send + Sync {
    fn connect(&self, data_module: &str) -> Result<Box<dyn Connection>, SchemeError>;
}

/// Connects to `{base_url}/{data_module}` over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
    read_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(base_url: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            read_timeout,
        }
    }

    #[must_use]
    pub fn module_url(&self, data_module: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(data_module)
        )
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, data_module: &str) -> Result<Box<dyn Connection>, SchemeError> {
        let url = self.module_url(data_module);
        let (mut socket, _response) = tungstenite::connect(url.as_str())
            .map_err(|err| SchemeError::transport(data_module, format!("connect {url}: {err}")))?;
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream
                .set_read_timeout(Some(self.read_timeout))
                .map_err(|err| SchemeError::transport(data_module, err))?;
        }
        debug!("connected to {url}");
        Ok(Box::new(WebSocketConnection {
            module: SmolStr::new(data_module),
            socket,
        }))
    }
}

struct WebSocketConnection {
    module: SmolStr,
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Connection for WebSocketConnection {
    fn send_text(&mut self, text: &str) -> Result<(), SchemeError> {
        self.socket
            .send(Message::text(text.to_string()))
            .map_err(|err| SchemeError::transport(&self.module, err))
    }

    fn receive(&mut self) -> Result<Received, SchemeError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Received::Text(text.as_str().to_string())),
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
                .map(Received::Text)
                .map_err(|err| SchemeError::transport(&self.module, err)),
            Ok(Message::Close(_)) => Ok(Received::Closed),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(Received::Idle),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(Received::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(Received::Closed)
            }
            Err(err) => Err(SchemeError::transport(&self.module, err)),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

/// Notifications from socket workers to the session thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened { module: SmolStr },
    Frame { module: SmolStr, text: String },
    Failed { module: SmolStr, error: SchemeError },
    Closed { module: SmolStr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Subscription state for the elements of one data module.
#[derive(Debug)]
pub struct TelemetryChannel {
    module: SmolStr,
    group: ModuleGroup,
    interval: Duration,
    outbound: Sender<String>,
    state: ChannelState,
    next_poll: Option<Instant>,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl TelemetryChannel {
    /// Channel without a socket worker; frames are queued on `outbound`.
    pub fn new(
        module: SmolStr,
        group: ModuleGroup,
        interval: Duration,
        outbound: Sender<String>,
    ) -> Self {
        Self {
            module,
            group,
            interval,
            outbound,
            state: ChannelState::Connecting,
            next_poll: None,
            cancel: CancelToken::new(),
            worker: None,
        }
    }

    /// Starts a socket worker for `module` that reports to `events`.
    pub fn spawn(
        module: SmolStr,
        group: ModuleGroup,
        interval: Duration,
        connector: Arc<dyn Connector>,
        events: Sender<ChannelEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = unbounded();
        let mut channel = Self::new(module.clone(), group, interval, outbound_tx);
        let cancel = channel.cancel.clone();
        channel.worker = Some(thread::spawn(move || {
            run_worker(&module, connector.as_ref(), &outbound_rx, &events, &cancel);
        }));
        channel
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn group(&self) -> &ModuleGroup {
        &self.group
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn send(&self, command: &Command) -> Result<(), SchemeError> {
        let text = command.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| SchemeError::ChannelClosed(self.module.clone()))
    }

    /// Subscribes the cov elements and arms the poll timer.
    pub fn on_open(&mut self, now: Instant) {
        info!(
            "data module {} open ({} cov, {} batched, {} single)",
            self.module,
            self.group.cov.len(),
            self.group.interval_batched.len(),
            self.group.interval_single.len()
        );
        self.state = ChannelState::Open;
        self.send_logged(&Command::cov(self.group.cov_ids()));
        self.next_poll = self.group.polls().then(|| now + self.interval);
    }

    /// Next instant at which [`Self::on_tick`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ChannelState::Open => self.next_poll,
            ChannelState::Connecting | ChannelState::Closed => None,
        }
    }

    /// Sends the poll requests if the timer is due. Returns true if it fired.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_deadline() else {
            return false;
        };
        if now < due {
            return false;
        }
        // one batched get per tick, even when every id is polled singly
        self.send_logged(&Command::get_batch(self.group.batched_ids()));
        for data_id in self.group.single_ids() {
            self.send_logged(&Command::get_single(data_id));
        }
        let next = due + self.interval;
        self.next_poll = Some(if next <= now { now + self.interval } else { next });
        true
    }

    /// Decodes one inbound frame into `data_id -> value` pairs. Status
    /// frames and malformed frames are logged and yield nothing.
    #[must_use]
    pub fn decode_frame(&self, text: &str) -> Vec<(String, Value)> {
        match Inbound::parse(text) {
            Ok(Inbound::Values(values)) => values,
            Ok(Inbound::Status { status, detail }) => {
                let detail = detail.unwrap_or_default();
                if status >= 400 {
                    error!("data module {} status {status}: {detail}", self.module);
                } else {
                    info!("data module {} status {status}: {detail}", self.module);
                }
                Vec::new()
            }
            Err(err) => {
                warn!("data module {}: {err}", self.module);
                Vec::new()
            }
        }
    }

    /// Transport failures are only logged; the channel is not retried.
    /// A failure before the socket opened ends the channel.
    pub fn on_failed(&mut self, error: &SchemeError) {
        error!("telemetry channel {}: {error}", self.module);
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Closed;
        }
    }

    pub fn on_closed(&mut self) {
        if self.state != ChannelState::Closed {
            warn!("telemetry channel {} closed", self.module);
        }
        self.state = ChannelState::Closed;
        self.next_poll = None;
    }

    /// Stops the socket worker and waits for it to exit.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.state = ChannelState::Closed;
        self.next_poll = None;
    }

    fn send_logged(&self, command: &Command) {
        if let Err(err) = self.send(command) {
            warn!("telemetry channel {}: {err}", self.module);
        }
    }
}

impl Drop for TelemetryChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn run_worker(
    module: &SmolStr,
    connector: &dyn Connector,
    outbound: &Receiver<String>,
    events: &Sender<ChannelEvent>,
    cancel: &CancelToken,
) {
    let mut connection = match connector.connect(module) {
        Ok(connection) => connection,
        Err(error) => {
            let _ = events.send(ChannelEvent::Failed {
                module: module.clone(),
                error,
            });
            return;
        }
    };
    if events
        .send(ChannelEvent::Opened {
            module: module.clone(),
        })
        .is_err()
    {
        connection.close();
        return;
    }
    loop {
        loop {
            match outbound.try_recv() {
                Ok(text) => {
                    if let Err(error) = connection.send_text(&text) {
                        let _ = events.send(ChannelEvent::Failed {
                            module: module.clone(),
                            error,
                        });
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    connection.close();
                    return;
                }
            }
        }
        // Frames queued before cancellation are flushed first.
        if cancel.is_cancelled() {
            connection.close();
            return;
        }
        match connection.receive() {
            Ok(Received::Text(text)) => {
                let event = ChannelEvent::Frame {
                    module: module.clone(),
                    text,
                };
                if events.send(event).is_err() {
                    connection.close();
                    return;
                }
            }
            Ok(Received::Idle) => {}
            Ok(Received::Closed) => {
                let _ = events.send(ChannelEvent::Closed {
                    module: module.clone(),
                });
                return;
            }
            Err(error) => {
                let _ = events.send(ChannelEvent::Failed {
                    module: module.clone(),
                    error,
                });
                let _ = events.send(ChannelEvent::Closed {
                    module: module.clone(),
                });
                return;
            }
        }
    }
}
