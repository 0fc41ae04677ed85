// src/connection/mod.rs
// Connection Manager: owns the WebSocket, authenticates on open, answers pings,
// and reconnects after abnormal closure with a fixed delay and bounded attempts

pub mod reconnect;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::config::ReconnectConfig;
use crate::protocol::{self, AuthPayload, InboundFrame, OutboundFrame};

pub use reconnect::ReconnectTracker;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle notifications delivered to the owner of the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt started (0 for the first connect)
    Connecting { attempt: u32 },
    /// Socket open and auth frame sent
    Open,
    /// Decoded inbound frame (pings never appear here)
    Frame(InboundFrame),
    /// Abnormal closure; the next attempt runs after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Closed for good: normal close code or caller-initiated
    Closed { code: Option<u16>, reason: String },
    /// Gave up after the configured number of attempts
    ReconnectExhausted { attempts: u32 },
}

/// Where the session controller sends frames. Implemented by
/// [`ConnectionHandle`]; a seam so turn logic can run without a socket.
pub trait FrameSink: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a frame. Returns `false` (and sends nothing) unless open.
    fn send(&self, frame: &OutboundFrame) -> bool;
}

#[derive(Debug)]
enum Command {
    Send(String),
    Reauthenticate(AuthPayload),
    Close,
}

enum Outcome {
    Normal { code: Option<u16>, reason: String },
    Abnormal { code: Option<u16>, reason: String },
}

/// Cloneable handle to a running connection task
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    auto_reconnect: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Replace the auth payload used on every future open; re-sent now if
    /// the socket is open.
    pub fn reauthenticate(&self, auth: AuthPayload) {
        let _ = self.commands.send(Command::Reauthenticate(auth));
    }

    /// Caller-initiated close. Auto-reconnect is disabled before the close
    /// is issued so a racing abnormal closure cannot schedule a retry.
    pub fn close(&self) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
    }
}

impl FrameSink for ConnectionHandle {
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn send(&self, frame: &OutboundFrame) -> bool {
        if !self.is_open() {
            debug!("Connection not open, frame not sent");
            return false;
        }
        match serde_json::to_string(frame) {
            Ok(json) => self.commands.send(Command::Send(json)).is_ok(),
            Err(e) => {
                warn!("Failed to serialize outbound frame: {}", e);
                false
            }
        }
    }
}

pub struct ConnectionManager {
    endpoint: String,
    auth: AuthPayload,
    tracker: ReconnectTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    auto_reconnect: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Start the connection task. Must be called inside a tokio runtime.
    pub fn spawn(
        endpoint: impl Into<String>,
        auth: AuthPayload,
        policy: &ReconnectConfig,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (manager, handle, events) = Self::new(endpoint, auth, policy);
        tokio::spawn(manager.run());
        (handle, events)
    }

    fn new(
        endpoint: impl Into<String>,
        auth: AuthPayload,
        policy: &ReconnectConfig,
    ) -> (Self, ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let auto_reconnect = Arc::new(AtomicBool::new(true));

        let manager = Self {
            endpoint: endpoint.into(),
            auth,
            tracker: ReconnectTracker::new(policy),
            commands: command_rx,
            events: event_tx,
            state: state_tx,
            auto_reconnect: auto_reconnect.clone(),
        };
        let handle = ConnectionHandle {
            commands: command_tx,
            state: state_rx,
            auto_reconnect,
        };
        (manager, handle, event_rx)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Connecting {
                attempt: self.tracker.attempt(),
            });
            info!(
                "Connecting to {} (attempt {})",
                self.endpoint,
                self.tracker.attempt() + 1
            );

            let outcome = match connect_async(self.endpoint.as_str()).await {
                Ok((ws, _)) => {
                    self.tracker.reset();
                    self.serve(ws).await
                }
                Err(e) => Outcome::Abnormal {
                    code: None,
                    reason: e.to_string(),
                },
            };
            self.set_state(ConnectionState::Closed);

            let (code, reason) = match outcome {
                Outcome::Normal { code, reason } => {
                    info!("Connection closed: code={:?}, reason={}", code, reason);
                    self.emit(ConnectionEvent::Closed { code, reason });
                    break;
                }
                Outcome::Abnormal { code, reason } => (code, reason),
            };

            if !self.auto_reconnect.load(Ordering::SeqCst) {
                info!("Connection closed, auto-reconnect disabled");
                self.emit(ConnectionEvent::Closed { code, reason });
                break;
            }

            warn!("Connection lost: code={:?}, reason={}", code, reason);
            let Some(attempt) = self.tracker.next_attempt() else {
                error!(
                    "Max reconnect attempts ({}) reached, giving up",
                    self.tracker.max_attempts()
                );
                self.emit(ConnectionEvent::ReconnectExhausted {
                    attempts: self.tracker.max_attempts(),
                });
                break;
            };

            let delay = self.tracker.delay();
            info!("Reconnecting in {}ms (attempt {})", delay.as_millis(), attempt);
            self.emit(ConnectionEvent::Reconnecting { attempt, delay });

            if !self.wait_before_retry(delay).await {
                self.emit(ConnectionEvent::Closed {
                    code: Some(NORMAL_CLOSE),
                    reason: "closed by client".to_string(),
                });
                break;
            }
        }
        debug!("Connection task finished");
    }

    /// Sleep out the retry delay. Returns `false` if the caller closed the
    /// connection meanwhile. Frames queued for the lost socket are dropped,
    /// never replayed on the next one.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        if !self.drain_pending() {
            return false;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.apply_while_disconnected(command) {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }

        self.drain_pending()
    }

    /// Handle every command already queued. `false` if a close was requested
    /// or every handle is gone.
    fn drain_pending(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if !self.apply_while_disconnected(command) {
                        return false;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply_while_disconnected(&mut self, command: Command) -> bool {
        match command {
            Command::Close => false,
            Command::Reauthenticate(auth) => {
                self.auth = auth;
                true
            }
            Command::Send(_) => {
                debug!("Dropping frame queued while disconnected");
                true
            }
        }
    }

    async fn serve(&mut self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Outcome {
        let (mut sink, mut stream) = ws.split();

        let auth = OutboundFrame::from(&self.auth);
        if let Err(reason) = send_frame(&mut sink, &auth).await {
            return Outcome::Abnormal { code: None, reason };
        }
        self.set_state(ConnectionState::Open);
        self.emit(ConnectionEvent::Open);
        info!("Connected to {}", self.endpoint);

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => match protocol::decode(text.as_str()) {
                        Some(InboundFrame::Ping) => {
                            debug!("Received ping, sending pong");
                            if let Err(reason) = send_frame(&mut sink, &OutboundFrame::Pong).await {
                                return Outcome::Abnormal { code: None, reason };
                            }
                        }
                        Some(frame) => self.emit(ConnectionEvent::Frame(frame)),
                        None => {}
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_string()))
                            .unwrap_or((None, String::new()));
                        return if code == Some(NORMAL_CLOSE) {
                            Outcome::Normal { code, reason }
                        } else {
                            Outcome::Abnormal { code, reason }
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Outcome::Abnormal { code: None, reason: e.to_string() };
                    }
                    None => {
                        return Outcome::Abnormal {
                            code: None,
                            reason: "connection dropped".to_string(),
                        };
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(json)) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            return Outcome::Abnormal { code: None, reason: e.to_string() };
                        }
                    }
                    Some(Command::Reauthenticate(auth)) => {
                        self.auth = auth;
                        let frame = OutboundFrame::from(&self.auth);
                        if let Err(reason) = send_frame(&mut sink, &frame).await {
                            return Outcome::Abnormal { code: None, reason };
                        }
                    }
                    Some(Command::Close) | None => {
                        self.set_state(ConnectionState::Closing);
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "closed by client".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                            debug!("Close frame not delivered: {}", e);
                        }
                        return Outcome::Normal {
                            code: Some(NORMAL_CLOSE),
                            reason: "closed by client".to_string(),
                        };
                    }
                },
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &OutboundFrame) -> Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}
