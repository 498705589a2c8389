//! Authenticated keep-alive chat client.
//!
//! SYSTEM CONTEXT
//! ==============
//! A collaborator (terminal UI, bot, test) hands credentials to a
//! [`ChatClient`]. The client trades them for a token over HTTP, opens a
//! WebSocket at `<address>?token=<token>`, keeps it alive with an
//! application-level ping/pong heartbeat, and reports state changes, inbound
//! application messages and errors as [`ClientEvent`]s.
//!
//! Wire framing lives in the `frames` crate; this crate owns the token
//! exchange, heartbeat and connection lifecycle.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;

#[cfg(test)]
mod test_helpers;

pub use auth::{AuthError, AuthToken, Credentials, HealthReport};
pub use config::ClientConfig;
pub use connection::{ChatClient, ClientEvent, ConnectionState, Events, token_address};
pub use error::{ClientError, ErrorKind};
pub use frames::Envelope;
pub use heartbeat::HeartbeatStats;
