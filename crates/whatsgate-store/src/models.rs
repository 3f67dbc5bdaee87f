//! Records persisted in the device database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whatsgate_shared::Jid;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A linked device as known to the store.
///
/// A record built by [`DeviceRecord::new`] has no row id until it is saved,
/// and no JID until pairing completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    /// SQLite row id; `None` for records never saved.
    pub row_id: Option<i64>,
    /// Full (AD) JID of this device, assigned by the server on pairing.
    pub jid: Option<Jid>,
    /// Our own display name as last reported by the server.
    pub push_name: String,
    /// Platform label shown on the primary device's linked-devices list.
    pub platform: String,
    /// Opaque key material owned by the protocol client.
    #[serde(skip)]
    pub credentials: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// A fresh, unsaved device with no identity.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            row_id: None,
            jid: None,
            push_name: String::new(),
            platform: String::new(),
            credentials: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self::new()
    }
}
