//! # whatsgate-shared
//!
//! Identity types and protocol constants shared by every whatsgate crate.

pub mod constants;
pub mod error;
pub mod jid;

pub use error::JidError;
pub use jid::Jid;
