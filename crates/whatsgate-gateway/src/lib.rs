//! # whatsgate-gateway
//!
//! Messaging gateway adapter: keeps linked-device sessions connected,
//! translates protocol events into normalized [`Event`]s for a host runtime,
//! and performs host commands (sending messages and attachments, presence,
//! contacts, groups).
//!
//! The wire protocol itself sits behind [`protocol::ProtocolClient`]; a
//! [`protocol::ClientFactory`] supplied at [`Gateway::init`] builds one
//! client per session.

pub mod attachment;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gateway;
pub mod logging;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{GatewayConfig, SessionConfig};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use session::{EventHandler, Session, SessionState};
pub use types::*;
