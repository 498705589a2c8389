//! Connection lifecycle manager.
//!
//! DESIGN
//! ======
//! A single task owns the socket, the pending token/handshake futures and the
//! heartbeat monitor. The collaborator talks to it through a cloneable
//! [`ChatClient`] handle (commands in) and an [`Events`] receiver (events
//! out). Commands, inbound frames and heartbeat ticks are multiplexed in one
//! `select!` loop, so they are processed one at a time in arrival order and
//! no locking is needed. State is checked before every write.
//!
//! LIFECYCLE
//! =========
//! ```text
//!  Idle/Closed ──connect──► (token) ──► Connecting ──open ok──► Open
//!       ▲                     │              │                   │
//!       │               auth failed     open failed      disconnect / peer close / error
//!       │                     │              │                   ▼
//!       └─────────────────────┴──────────────┴──────────────── Closing ─► Closed
//! ```
//!
//! - Token acquisition happens before `Connecting`; an auth failure leaves
//!   the state untouched.
//! - The heartbeat monitor lives inside the `Open` phase and is dropped on
//!   every exit from it.
//! - `connect`/`open` while a connection is active tears that connection down
//!   first.
//! - There is no automatic reconnect.

use std::fmt;

use frames::{Envelope, FrameKind};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::auth::{self, AuthToken, Credentials};
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorKind};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatStats, TimerGauge};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// PUBLIC TYPES
// =============================================================================

/// Connection state as observed by the collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Event delivered to the collaborator, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    /// Inbound application message. Heartbeat frames never appear here.
    Message(Envelope),
    Error { kind: ErrorKind, detail: String },
}

/// Receiving side of a client's event stream.
pub type Events = mpsc::UnboundedReceiver<ClientEvent>;

/// Build the tokenized connection address, `<address>?token=<token>`.
///
/// # Errors
///
/// Returns [`ClientError::InvalidAddress`] when `websocket_address` does not
/// parse as a URL.
pub fn token_address(websocket_address: &str, token: &AuthToken) -> Result<String, ClientError> {
    let mut url = reqwest::Url::parse(websocket_address)
        .map_err(|_| ClientError::InvalidAddress(websocket_address.to_owned()))?;
    url.query_pairs_mut().append_pair("token", token.as_str());
    Ok(url.into())
}

// =============================================================================
// HANDLE
// =============================================================================

enum Command {
    Connect(Credentials),
    Open(String),
    Send(String),
    Disconnect,
    Stats(oneshot::Sender<Option<HeartbeatStats>>),
}

/// Cloneable handle to a connection task.
///
/// Dropping every handle shuts the task down and closes any open socket.
#[derive(Clone, Debug)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    timers: TimerGauge,
}

impl ChatClient {
    /// Spawn the connection task on the current Tokio runtime.
    #[must_use]
    pub fn spawn(config: ClientConfig) -> (Self, Events) {
        Self::spawn_with_http(config, reqwest::Client::new())
    }

    /// Like [`ChatClient::spawn`], reusing an existing HTTP client.
    #[must_use]
    pub fn spawn_with_http(config: ClientConfig, http: reqwest::Client) -> (Self, Events) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let timers = TimerGauge::default();

        let session = Session {
            config,
            http,
            commands: commands_rx,
            events: events_tx,
            state: state_tx,
            timers: timers.clone(),
            phase: Phase::Idle,
        };
        tokio::spawn(session.run());

        let client = Self {
            commands: commands_tx,
            state: state_rx,
            timers,
        };
        (client, events_rx)
    }

    /// Acquire a token with `credentials`, then open the connection.
    /// Returns immediately; progress is reported through events.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the connection task is gone.
    pub fn connect(&self, credentials: Credentials) -> Result<(), ClientError> {
        self.command(Command::Connect(credentials))
    }

    /// Open the connection with an already acquired token. An empty token
    /// or address is skipped with a log line and no state change.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the connection task is gone.
    pub fn open(&self, token: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::Open(token.into()))
    }

    /// Send an application message as `{"payload":{"message":text},"metadata":{"sent":true}}`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without writing anything when
    /// the connection is not open, or [`ClientError::Shutdown`] if the
    /// connection task is gone.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        self.command(Command::Send(text.into()))
    }

    /// Close the connection. A no-op unless open or connecting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the connection task is gone.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the state equals `target`.
    ///
    /// Only the latest state is observed, so a transient state that was
    /// already replaced may be missed; use [`Events`] for the exact sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the connection task exits first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Shutdown)
    }

    /// Number of heartbeat timers currently alive (0 or 1).
    #[must_use]
    pub fn active_heartbeats(&self) -> usize {
        self.timers.active()
    }

    /// Heartbeat counters of the open connection, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the connection task is gone.
    pub async fn heartbeat_stats(&self) -> Result<Option<HeartbeatStats>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Shutdown)
    }
}

// =============================================================================
// SESSION TASK
// =============================================================================

struct Link {
    socket: WsStream,
    heartbeat: HeartbeatMonitor,
}

enum Phase {
    /// Nothing in flight. State is `Idle` or `Closed`.
    Idle,
    /// Waiting for the token exchange. State is unchanged.
    Authenticating(BoxFuture<'static, Result<AuthToken, auth::AuthError>>),
    /// Waiting for the WebSocket handshake.
    Connecting {
        handshake: BoxFuture<'static, Result<WsStream, tungstenite::Error>>,
        cancelled: bool,
    },
    Open(Link),
}

enum Wake {
    Command(Command),
    Token(Result<AuthToken, auth::AuthError>),
    Handshake(Result<WsStream, tungstenite::Error>),
    Inbound(Option<Result<Message, tungstenite::Error>>),
    Tick,
}

struct Session {
    config: ClientConfig,
    http: reqwest::Client,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    timers: TimerGauge,
    phase: Phase,
}

impl Session {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => break,
                },
                wake = next_wake(&mut self.phase) => wake,
            };

            match wake {
                Wake::Command(command) => self.on_command(command).await,
                Wake::Token(result) => self.on_token(result),
                Wake::Handshake(result) => self.on_handshake(result).await,
                Wake::Inbound(message) => self.on_inbound(message).await,
                Wake::Tick => self.on_tick().await,
            }
        }

        self.teardown().await;
        debug!("chat: session task stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(credentials) => {
                self.teardown().await;
                info!(username = %credentials.username, "chat: acquiring token");
                let http = self.http.clone();
                let endpoint = self.config.auth_endpoint.clone();
                self.phase = Phase::Authenticating(Box::pin(async move {
                    auth::acquire_token(&http, &endpoint, &credentials).await
                }));
            }
            Command::Open(token) => {
                self.teardown().await;
                self.begin_open(&token);
            }
            Command::Send(text) => self.send_application(&text).await,
            Command::Disconnect => self.disconnect().await,
            Command::Stats(reply) => {
                let stats = match &self.phase {
                    Phase::Open(link) => Some(link.heartbeat.stats().clone()),
                    _ => None,
                };
                let _ = reply.send(stats);
            }
        }
    }

    fn on_token(&mut self, result: Result<AuthToken, auth::AuthError>) {
        self.phase = Phase::Idle;
        match result {
            Ok(token) => self.begin_open(token.as_str()),
            Err(error) => self.report(&ClientError::Auth(error)),
        }
    }

    fn begin_open(&mut self, token: &str) {
        let address = self.config.websocket_address.trim();
        if address.is_empty() {
            warn!("chat: websocket address is not provided; skipping connect");
            return;
        }
        let Some(token) = AuthToken::new(token) else {
            warn!("chat: authentication token is not provided; skipping connect");
            return;
        };

        let url = match token_address(address, &token) {
            Ok(url) => url,
            Err(error) => {
                self.report(&error);
                return;
            }
        };

        info!(%address, "chat: opening websocket");
        self.set_state(ConnectionState::Connecting);
        self.phase = Phase::Connecting {
            handshake: Box::pin(async move {
                tokio_tungstenite::connect_async(url)
                    .await
                    .map(|(socket, _)| socket)
            }),
            cancelled: false,
        };
    }

    async fn on_handshake(&mut self, result: Result<WsStream, tungstenite::Error>) {
        let cancelled = matches!(self.phase, Phase::Connecting { cancelled: true, .. });
        self.phase = Phase::Idle;

        match result {
            Ok(mut socket) if cancelled => {
                debug!("chat: discarding connection opened after disconnect");
                let _ = socket.close(None).await;
                self.set_state(ConnectionState::Closed);
            }
            Ok(socket) => {
                let heartbeat = HeartbeatMonitor::start(self.config.heartbeat_interval, &self.timers);
                self.phase = Phase::Open(Link { socket, heartbeat });
                self.set_state(ConnectionState::Open);
            }
            Err(error) => {
                if !cancelled {
                    self.report(&ClientError::from(error));
                }
                self.set_state(ConnectionState::Closed);
            }
        }
    }

    async fn on_inbound(&mut self, message: Option<Result<Message, tungstenite::Error>>) {
        match message {
            Some(Ok(Message::Text(text))) => self.on_frame(text.as_bytes()).await,
            Some(Ok(Message::Binary(bytes))) => self.on_frame(&bytes).await,
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "chat: peer closed connection");
                self.close_link(false).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Err(error)) => {
                self.report(&ClientError::from(error));
                self.close_link(false).await;
            }
            None => {
                info!("chat: connection stream ended");
                self.close_link(false).await;
            }
        }
    }

    async fn on_frame(&mut self, bytes: &[u8]) {
        let envelope = match frames::decode(bytes) {
            Ok(envelope) => envelope,
            Err(error) => {
                self.report(&ClientError::from(error));
                return;
            }
        };

        match frames::classify(&envelope) {
            FrameKind::Heartbeat(beat) => {
                debug!(?beat, "chat: heartbeat received");
                let Phase::Open(link) = &mut self.phase else {
                    return;
                };
                if let Some(reply) = link.heartbeat.on_heartbeat(beat) {
                    self.write(&reply).await;
                }
            }
            FrameKind::Application => {
                self.emit(ClientEvent::Message(envelope));
            }
        }
    }

    async fn on_tick(&mut self) {
        let Phase::Open(link) = &mut self.phase else {
            return;
        };
        let probe = link.heartbeat.on_tick();
        debug!(
            pings_sent = link.heartbeat.stats().pings_sent,
            "chat: sending heartbeat probe"
        );
        self.write(&probe).await;
    }

    async fn send_application(&mut self, text: &str) {
        if !self.is_open() {
            self.report(&ClientError::NotConnected);
            return;
        }
        self.write(&Envelope::new(text, true)).await;
    }

    async fn disconnect(&mut self) {
        match self.phase {
            Phase::Idle => debug!(state = %self.state(), "chat: disconnect ignored"),
            Phase::Authenticating(_) => {
                info!("chat: connect attempt abandoned during authentication");
                self.phase = Phase::Idle;
            }
            Phase::Connecting { ref mut cancelled, .. } => {
                info!("chat: disconnect requested while connecting");
                *cancelled = true;
            }
            Phase::Open(_) => self.close_link(true).await,
        }
    }

    /// Write one envelope to the open socket. A write failure closes the link.
    async fn write(&mut self, envelope: &Envelope) {
        if !self.is_open() {
            return;
        }
        let Phase::Open(link) = &mut self.phase else {
            return;
        };

        let text = frames::encode_envelope(envelope);
        let result = link.socket.send(Message::Text(text.into())).await;
        if let Err(error) = result {
            self.report(&ClientError::from(error));
            self.close_link(false).await;
        }
    }

    /// Leave the open phase. The heartbeat is dropped before anything else.
    async fn close_link(&mut self, local: bool) {
        if !matches!(self.phase, Phase::Open(_)) {
            return;
        }
        let Phase::Open(link) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        let Link { mut socket, heartbeat } = link;
        drop(heartbeat);

        if local {
            self.set_state(ConnectionState::Closing);
        }
        // Completes the close handshake for peer-initiated closes too.
        if let Err(error) = socket.close(None).await {
            debug!(%error, "chat: close handshake did not complete");
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Abandon whatever is in flight so a new attempt starts clean.
    async fn teardown(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle | Phase::Authenticating(_) => {}
            Phase::Connecting { .. } => self.set_state(ConnectionState::Closed),
            open @ Phase::Open(_) => {
                self.phase = open;
                self.close_link(true).await;
            }
        }
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && matches!(self.phase, Phase::Open(_))
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        if self.state() == next {
            return;
        }
        self.state.send_replace(next);
        info!(state = %next, "chat: state changed");
        self.emit(ClientEvent::StateChanged(next));
    }

    fn report(&self, error: &ClientError) {
        let kind = error.kind();
        warn!(%kind, %error, "chat: error");
        self.emit(ClientEvent::Error {
            kind,
            detail: error.to_string(),
        });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_wake(phase: &mut Phase) -> Wake {
    match phase {
        Phase::Idle => std::future::pending().await,
        Phase::Authenticating(token) => Wake::Token(token.await),
        Phase::Connecting { handshake, .. } => Wake::Handshake(handshake.await),
        Phase::Open(link) => tokio::select! {
            message = link.socket.next() => Wake::Inbound(message),
            () = link.heartbeat.tick() => Wake::Tick,
        },
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
