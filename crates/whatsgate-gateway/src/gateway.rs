//! Process-wide gateway state.
//!
//! A [`Gateway`] owns what every session shares: the device store, the media
//! converter, the host dispatch queue and the protocol client factory.
//! Sessions are cheap handles created from it.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};
use whatsgate_media::{Converter, MediaConfig};
use whatsgate_store::Database;

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::logging;
use crate::protocol::ClientFactory;
use crate::session::Session;
use crate::types::LinkedDevice;

pub struct Gateway {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub config: GatewayConfig,
    pub db: Mutex<Database>,
    pub converter: Converter,
    pub dispatcher: Dispatcher,
    pub factory: Arc<dyn ClientFactory>,
}

impl Gateway {
    /// Install logging, open the device store, locate the transcoder and
    /// start the dispatch thread.
    pub fn init(config: GatewayConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        logging::init(&config.log_level);

        let db = Database::open_at(&config.db_path)?;

        let temp_dir = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        let media = MediaConfig::detect(temp_dir).with_timeout(config.media_timeout);
        if media.ffmpeg.is_none() {
            warn!("ffmpeg not found on PATH, audio and video conversion disabled");
        }

        let gateway = Self::from_parts(config, db, Converter::new(media), factory)?;
        info!(db = %gateway.shared.config.db_path.display(), "Gateway initialised");
        Ok(gateway)
    }

    /// Assemble a gateway from already constructed parts.
    pub fn from_parts(
        config: GatewayConfig,
        db: Database,
        converter: Converter,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::spawn(config.dispatch_capacity)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                db: Mutex::new(db),
                converter,
                dispatcher,
                factory,
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// A new, not yet logged in session for `device`.
    pub fn new_session(&self, device: LinkedDevice) -> Session {
        Session::new(self.shared.clone(), device)
    }

    /// Delete stored devices superseded by `device`. Returns how many were
    /// removed.
    pub fn cleanup_session(&self, device: &LinkedDevice) -> Result<usize> {
        self.shared.cleanup_session(device)
    }
}

impl Shared {
    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove device records left without an identity and, once `device` is
    /// paired, records for the same account under a different device id (an
    /// earlier pairing).
    pub fn cleanup_session(&self, device: &LinkedDevice) -> Result<usize> {
        let current = if device.is_paired() {
            Some(device.jid()?)
        } else {
            None
        };

        let db = self.db();
        let mut removed = 0;
        for record in db.get_all_devices()? {
            let stale = match (&record.jid, &current) {
                (None, _) => true,
                (Some(jid), Some(current)) => jid.to_non_ad() == current.to_non_ad() && jid != current,
                (Some(_), None) => false,
            };
            if stale && db.delete_device(&record)? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Removed superseded device records");
        }
        Ok(removed)
    }
}
