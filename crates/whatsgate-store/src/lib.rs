//! # whatsgate-store
//!
//! Persistent storage for linked-device records, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the `devices`
//! table. Credentials are stored as an opaque blob owned by the protocol
//! client; this crate never inspects them.

pub mod database;
pub mod devices;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
