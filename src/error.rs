//! Client error taxonomy.
//!
//! Protocol-level failures (decode errors, sends that raced a close) are
//! absorbed by the connection task and surfaced as
//! [`ClientEvent::Error`](crate::ClientEvent::Error) carrying an
//! [`ErrorKind`]; they never tear the client down.

use crate::auth::AuthError;

/// Coarse error class reported to the collaborator with every error event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Token exchange failed; no transport was opened.
    Authentication,
    /// An inbound frame could not be decoded; the connection stays open.
    FrameDecode,
    /// A send was attempted while the connection was not open.
    NotConnected,
    /// The underlying connection failed or could not be established.
    Transport,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::FrameDecode => write!(f, "frame_decode"),
            Self::NotConnected => write!(f, "not_connected"),
            Self::Transport => write!(f, "transport"),
        }
    }
}

/// Error returned by [`ChatClient`](crate::ChatClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("frame decode failed: {0}")]
    Decode(#[from] frames::CodecError),
    #[error("not connected")]
    NotConnected,
    #[error("invalid websocket address: {0}")]
    InvalidAddress(String),
    #[error("websocket transport failed: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    /// The connection task has exited; the handle is no longer usable.
    #[error("client has shut down")]
    Shutdown,
}

impl ClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Authentication,
            Self::Decode(_) => ErrorKind::FrameDecode,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidAddress(_) | Self::Transport(_) | Self::Shutdown => ErrorKind::Transport,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}
