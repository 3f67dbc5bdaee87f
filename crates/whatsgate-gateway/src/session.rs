//! One linked device and its connection.
//!
//! A [`Session`] owns the protocol client for a device, translates what the
//! client reports into [`Event`]s for the host, and performs host commands.
//! Background work (raw event loop, presence refresh, QR forwarding and
//! reconnection) runs on tokio tasks tied to the session's cancellation
//! token; dropping the last handle or logging out stops all of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use whatsgate_media::{MimeType, Spec};
use whatsgate_shared::constants::{MAX_PREVIEW_THUMBNAIL_SIZE, PREVIEW_THUMBNAIL_WIDTH};
use whatsgate_shared::Jid;
use whatsgate_store::DeviceRecord;

use crate::attachment::upload_attachment;
use crate::error::{GatewayError, Result};
use crate::event::{self, Translator};
use crate::gateway::Shared;
use crate::presence;
use crate::protocol::{
    ChatPresence, ClientError, ConnectFailureReason, ContactInfo, ContextInfo, ExtendedText,
    HistorySync, HistorySyncType, LocationPayload, MessageKey, ParticipantChange, PreviewType,
    ProtoMessage, ProtocolClient, ProtocolKind, ProtocolPayload, QrEvent, RawEvent,
    ReactionPayload, SendExtra, APP_STATE_CRITICAL_BLOCK, APP_STATE_CRITICAL_UNBLOCK_LOW,
};
use crate::reconnect::{reconnect_loop, Backoff};
use crate::types::{
    Avatar, CallState, ChatState, ChatStateKind, Connect, Contact, Event, Group, GroupAffiliation,
    GroupParticipant, GroupParticipantAction, LinkedDevice, Message, MessageKind, PresenceKind,
    PreviewKind, Receipt,
};

/// Host callback receiving every normalized event.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

const RAW_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Pairing,
    Connected,
    Disconnected,
    LoggedOut,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    device: Mutex<LinkedDevice>,
    record: Mutex<DeviceRecord>,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    handler: RwLock<Option<EventHandler>>,
    presence_tx: Mutex<Option<mpsc::Sender<PresenceKind>>>,
    cancel: Mutex<CancellationToken>,
    backoff: Arc<Mutex<Backoff>>,
    reconnecting: Arc<AtomicBool>,
    state: Mutex<SessionState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        lock(&self.cancel).cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, device: LinkedDevice) -> Self {
        let timing = &shared.config.session;
        let backoff = Backoff::new(timing.reconnect_floor, timing.reconnect_ceiling);

        Self {
            inner: Arc::new(Inner {
                shared,
                device: Mutex::new(device),
                record: Mutex::new(DeviceRecord::new()),
                client: RwLock::new(None),
                handler: RwLock::new(None),
                presence_tx: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                backoff: Arc::new(Mutex::new(backoff)),
                reconnecting: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(SessionState::Unauthenticated),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    pub fn device(&self) -> LinkedDevice {
        lock(&self.inner.device).clone()
    }

    /// Set the callback that receives this session's events. Events raised
    /// while no handler is set are dropped with an error log.
    pub fn set_event_handler(&self, handler: impl Fn(Event) + Send + Sync + 'static) {
        let mut slot = self.inner.handler.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(Arc::new(handler));
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.inner.state) = state;
    }

    fn client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.inner
            .client
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn handler(&self) -> Option<EventHandler> {
        self.inner
            .handler
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// The client, provided it carries a device identity.
    fn authed(&self, action: &'static str) -> Result<Arc<dyn ProtocolClient>> {
        match self.client() {
            Some(client) if client.device_id().is_some() => Ok(client),
            _ => Err(GatewayError::Unauthenticated(action)),
        }
    }

    fn own_jid(client: &dyn ProtocolClient) -> Jid {
        client.device_id().map(|jid| jid.to_non_ad()).unwrap_or_default()
    }

    fn translator<'a>(
        &'a self,
        client: &'a dyn ProtocolClient,
        cancel: &'a CancellationToken,
    ) -> Translator<'a> {
        Translator {
            client,
            converter: &self.inner.shared.converter,
            cancel,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect, pairing first if the device has no stored identity.
    ///
    /// Pairing codes are delivered as [`Event::QrCode`]; completion arrives
    /// later as [`Event::Pair`].
    pub async fn login(&self) -> Result<()> {
        let record = self.load_record()?;
        let (events_tx, events_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let client = self
            .inner
            .shared
            .factory
            .create(&record, &self.inner.shared.config.device_name, events_tx);
        *lock(&self.inner.record) = record;

        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.inner.cancel), cancel.clone());
        previous.cancel();

        *self.inner.client.write().unwrap_or_else(|p| p.into_inner()) = Some(client.clone());
        self.start_tasks(events_rx, cancel.clone());

        if client.device_id().is_some() {
            client.connect().await?;
            lock(&self.inner.backoff).reset();
            self.set_state(SessionState::Connected);
            info!("Session connected");
            return Ok(());
        }

        let qr = client.qr_channel().await?;
        client.connect().await?;
        lock(&self.inner.backoff).reset();
        self.set_state(SessionState::Pairing);
        debug!("Waiting for device pairing");

        tokio::spawn(forward_qr(Arc::downgrade(&self.inner), client, qr, cancel));
        Ok(())
    }

    /// The stored record for a paired device, or a fresh one.
    fn load_record(&self) -> Result<DeviceRecord> {
        let device = self.device();
        let db = self.inner.shared.db();
        if device.is_paired() {
            let jid = device.jid()?;
            if let Some(record) = db.get_device(&jid)? {
                return Ok(record);
            }
            warn!("No stored record for linked device, pairing again");
        }
        Ok(db.new_device())
    }

    fn start_tasks(&self, events: mpsc::Receiver<RawEvent>, cancel: CancellationToken) {
        tokio::spawn(event_loop(Arc::downgrade(&self.inner), events, cancel));

        let (presence_tx, presence_rx) = mpsc::channel(1);
        *lock(&self.inner.presence_tx) = Some(presence_tx);

        let weak = Arc::downgrade(&self.inner);
        let base = self.inner.shared.config.session.presence_refresh;
        tokio::spawn(presence::refresh_loop(presence_rx, base, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = (Session { inner }).get_contacts(false).await {
                    warn!(error = %e, "Failed to refresh contact presence");
                }
            }
        }));
    }

    /// Stop background work and forget the client.
    fn detach(&self, state: SessionState) {
        *self.inner.client.write().unwrap_or_else(|p| p.into_inner()) = None;
        lock(&self.inner.presence_tx).take();
        lock(&self.inner.cancel).cancel();
        self.set_state(state);
    }

    /// Remove the device from the server and from the local store.
    pub async fn logout(&self) -> Result<()> {
        let Some(client) = self.client() else {
            return Ok(());
        };
        if client.device_id().is_none() {
            return Ok(());
        }

        let result = client.logout().await;
        self.forget_device();
        self.detach(SessionState::LoggedOut);
        info!("Session logged out");
        result.map_err(Into::into)
    }

    /// Close the connection, keeping local credentials.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(client) = self.client() else {
            return Ok(());
        };

        self.detach(SessionState::Disconnected);
        client.disconnect().await;
        debug!("Session disconnected");
        Ok(())
    }

    /// Pair by phone number instead of QR code. Returns the code to type on
    /// the primary device.
    pub async fn pair_phone(&self, phone: &str) -> Result<String> {
        let client = self.client().ok_or(GatewayError::Uninitialized("pair"))?;
        if client.device_id().is_some() {
            return Err(GatewayError::AlreadyPaired);
        }
        if phone.is_empty() {
            return Err(GatewayError::EmptyPhone);
        }
        Ok(client.pair_phone(phone).await?)
    }

    fn forget_device(&self) {
        let record = lock(&self.inner.record).clone();
        let device = std::mem::take(&mut *lock(&self.inner.device));
        let db = self.inner.shared.db();

        let result = match device.jid() {
            Ok(jid) => db.delete_device_by_jid(&jid),
            Err(_) => db.delete_device(&record),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to delete device record");
        }
    }

    // -----------------------------------------------------------------------
    // Raw events
    // -----------------------------------------------------------------------

    async fn handle_event(&self, raw: RawEvent, cancel: &CancellationToken) {
        let Some(client) = self.client() else {
            debug!("Dropping event for detached session");
            return;
        };

        match raw {
            RawEvent::Connected | RawEvent::PushNameSetting => {
                if !client.push_name().is_empty() {
                    self.announce_connected(client.as_ref()).await;
                }
            }
            RawEvent::AppStateSyncComplete { name } => {
                if name == APP_STATE_CRITICAL_BLOCK && !client.push_name().is_empty() {
                    self.announce_connected(client.as_ref()).await;
                }
            }
            RawEvent::ConnectFailure { reason, message } => match reason {
                ConnectFailureReason::LoggedOut => {}
                ConnectFailureReason::Other(code) => {
                    error!(code, message = %message, "Failed connecting to server");
                    self.propagate(Event::Connect(Connect {
                        error: message,
                        ..Connect::default()
                    }))
                    .await;
                }
            },
            RawEvent::HistorySync(sync) => {
                self.handle_history(client.as_ref(), sync, cancel).await;
            }
            RawEvent::Message(evt) => {
                let translated = self
                    .translator(client.as_ref(), cancel)
                    .message_event(&evt)
                    .await;
                self.propagate(translated).await;
            }
            RawEvent::Receipt(evt) => self.propagate(event::receipt_event(&evt)).await,
            RawEvent::Presence(evt) => self.propagate(event::presence_event(&evt)).await,
            RawEvent::PushName { jid, push_name } => {
                let info = ContactInfo {
                    full_name: push_name,
                    ..ContactInfo::default()
                };
                self.propagate(event::contact_event(&jid, &info)).await;
            }
            RawEvent::JoinedGroup(info) => {
                let group = event::group_from_info(&info, &client.push_name());
                self.propagate(Event::Group(group)).await;
            }
            RawEvent::GroupInfo(update) => self.propagate(event::group_event(&update)).await,
            RawEvent::ChatPresence(evt) => self.propagate(event::chat_state_event(&evt)).await,
            RawEvent::CallOffer(meta) => {
                let state = Some(CallState::Incoming);
                self.propagate(event::call_event(state, &meta)).await;
            }
            RawEvent::CallTerminate { meta, reason } => {
                let state = event::call_state_from_reason(&reason);
                self.propagate(event::call_event(state, &meta)).await;
            }
            RawEvent::LoggedOut => {
                client.disconnect().await;
                self.forget_device();
                self.detach(SessionState::LoggedOut);
                info!("Device logged out remotely");
                self.propagate(Event::LoggedOut).await;
            }
            RawEvent::PairSuccess { id, platform } => {
                self.handle_pair_success(client.as_ref(), id, platform).await;
            }
            RawEvent::KeepAliveTimeout { error_count } => {
                let threshold = self.inner.shared.config.session.keepalive_threshold;
                if error_count > threshold {
                    self.spawn_reconnect(client);
                } else {
                    debug!(error_count, "Keep-alive timeout");
                }
            }
            RawEvent::Other(name) => debug!(event = %name, "Ignoring unhandled event"),
        }
    }

    async fn announce_connected(&self, client: &dyn ProtocolClient) {
        self.set_state(SessionState::Connected);
        let jid = Self::own_jid(client).to_string();
        self.propagate(Event::Connect(Connect {
            jid,
            ..Connect::default()
        }))
        .await;

        if let Err(e) = self.send_presence(PresenceKind::Available, "").await {
            warn!(error = %e, "Failed to send initial presence");
        }
    }

    async fn handle_history(
        &self,
        client: &dyn ProtocolClient,
        sync: HistorySync,
        cancel: &CancellationToken,
    ) {
        match sync.sync_type {
            HistorySyncType::PushName => {
                for entry in &sync.push_names {
                    let jid = match Jid::parse(&entry.id) {
                        Ok(jid) => jid,
                        Err(e) => {
                            debug!(error = %e, "Skipping push name with invalid JID");
                            continue;
                        }
                    };
                    let info = ContactInfo {
                        full_name: entry.push_name.clone(),
                        ..ContactInfo::default()
                    };
                    self.propagate(event::contact_event(&jid, &info)).await;
                    if let Err(e) = client.subscribe_presence(&jid).await {
                        warn!(error = %e, "Failed to subscribe to presence");
                    }
                }
            }
            HistorySyncType::InitialBootstrap
            | HistorySyncType::Recent
            | HistorySyncType::OnDemand => {
                let translator = self.translator(client, cancel);
                for conversation in &sync.conversations {
                    for message in &conversation.messages {
                        let translated = translator.history_event(message).await;
                        self.propagate(translated).await;
                    }
                }
            }
            HistorySyncType::Other => debug!("Ignoring history sync"),
        }
    }

    async fn handle_pair_success(&self, client: &dyn ProtocolClient, id: Jid, platform: String) {
        if id.is_empty() {
            error!("Pairing succeeded, but device ID is missing");
            return;
        }

        let device = LinkedDevice::new(id.to_string());
        *lock(&self.inner.device) = device.clone();

        {
            let mut record = lock(&self.inner.record);
            record.jid = Some(id);
            record.platform = platform;
            record.push_name = client.push_name();
            record.credentials = client.credentials();
            if let Err(e) = self.inner.shared.db().save_device(&mut record) {
                error!(error = %e, "Failed to persist paired device");
            }
        }

        if let Err(e) = self.inner.shared.cleanup_session(&device) {
            warn!(error = %e, "Failed to clean up previous devices");
        }

        self.set_state(SessionState::Connected);
        info!("Device paired");
        self.propagate(Event::Pair(device.id)).await;
    }

    fn spawn_reconnect(&self, client: Arc<dyn ProtocolClient>) {
        let flag = self.inner.reconnecting.clone();
        if flag.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress");
            return;
        }

        let backoff = self.inner.backoff.clone();
        let cancel = lock(&self.inner.cancel).clone();
        tokio::spawn(async move {
            reconnect_loop(client.as_ref(), &backoff, &cancel).await;
            flag.store(false, Ordering::SeqCst);
        });
    }

    /// Hand `event` to the host through the dispatch queue.
    async fn propagate(&self, event: Event) {
        if matches!(event, Event::Unknown) {
            return;
        }
        let Some(handler) = self.handler() else {
            error!(kind = ?event.kind(), "Event handler not set, dropping event");
            return;
        };
        if let Err(e) = self
            .inner
            .shared
            .dispatcher
            .dispatch(move || handler(event))
            .await
        {
            error!(error = %e, "Failed to dispatch event");
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Send `message` to its recipient. `cancel` bounds any attachment
    /// conversion done beforehand.
    pub async fn send_message(&self, mut message: Message, cancel: &CancellationToken) -> Result<()> {
        let client = self.authed("send message")?;
        let jid = Jid::parse(&message.jid)?;
        let message_id = (!message.id.is_empty()).then(|| message.id.clone());

        let (payload, extra) = match message.kind {
            MessageKind::Attachment => {
                let Some(attach) = message.attachments.first_mut() else {
                    return Ok(());
                };
                let converter = &self.inner.shared.converter;
                let payload = upload_attachment(client.as_ref(), converter, cancel, attach).await?;
                (payload, SendExtra { id: message_id, ..SendExtra::default() })
            }
            MessageKind::Edit => {
                let content = self.content_payload(client.as_ref(), &message, cancel).await;
                let payload = ProtoMessage {
                    protocol: Some(ProtocolPayload {
                        key: MessageKey {
                            remote_jid: jid.to_string(),
                            from_me: true,
                            id: message.id.clone(),
                            participant: None,
                        },
                        kind: ProtocolKind::Edit {
                            edited: Some(Box::new(content)),
                            timestamp_ms: Utc::now().timestamp_millis(),
                        },
                    }),
                    ..ProtoMessage::default()
                };
                (payload, SendExtra::default())
            }
            MessageKind::Revoke => {
                let participant = if message.origin_jid.is_empty() {
                    None
                } else {
                    Some(Jid::parse(&message.origin_jid)?.to_string())
                };
                let payload = ProtoMessage {
                    protocol: Some(ProtocolPayload {
                        key: MessageKey {
                            remote_jid: jid.to_string(),
                            from_me: participant.is_none(),
                            id: message.id.clone(),
                            participant,
                        },
                        kind: ProtocolKind::Revoke,
                    }),
                    ..ProtoMessage::default()
                };
                (payload, SendExtra::default())
            }
            MessageKind::Reaction => {
                let payload = ProtoMessage {
                    reaction: Some(ReactionPayload {
                        key: MessageKey {
                            remote_jid: message.jid.clone(),
                            from_me: message.is_carbon,
                            id: message.id.clone(),
                            participant: Some(message.origin_jid.clone()),
                        },
                        text: message.body.clone(),
                        sender_timestamp_ms: Utc::now().timestamp_millis(),
                    }),
                    ..ProtoMessage::default()
                };
                (payload, SendExtra::default())
            }
            MessageKind::Plain => {
                let payload = self.content_payload(client.as_ref(), &message, cancel).await;
                (payload, SendExtra { id: message_id, ..SendExtra::default() })
            }
        };

        debug!(jid = %jid, kind = ?message.kind, "Sending message");
        client.send_message(&jid, payload, extra).await?;
        Ok(())
    }

    /// Text content with reply context, link preview, mentions and location.
    async fn content_payload(
        &self,
        client: &dyn ProtocolClient,
        message: &Message,
        cancel: &CancellationToken,
    ) -> ProtoMessage {
        let mut extended: Option<ExtendedText> = None;
        let new_extended = || ExtendedText {
            text: message.body.clone(),
            ..ExtendedText::default()
        };

        if !message.reply_id.is_empty() {
            let participant = if message.origin_jid.is_empty() {
                Self::own_jid(client).to_string()
            } else {
                message.origin_jid.clone()
            };
            let ext = extended.get_or_insert_with(new_extended);
            ext.context = Some(ContextInfo {
                stanza_id: message.reply_id.clone(),
                participant,
                quoted_message: Some(Box::new(ProtoMessage::text(message.reply_body.clone()))),
                ..ContextInfo::default()
            });
        }

        let preview = &message.preview;
        if !preview.url.is_empty() {
            let ext = extended.get_or_insert_with(new_extended);
            ext.preview_type = Some(match preview.kind {
                PreviewKind::Plain => PreviewType::None,
                PreviewKind::Video => PreviewType::Video,
            });
            ext.matched_text = preview.url.clone();
            ext.canonical_url = preview.url.clone();
            ext.title = preview.title.clone();
            ext.description = preview.description.clone();

            if !preview.thumbnail.is_empty() && preview.thumbnail.len() < MAX_PREVIEW_THUMBNAIL_SIZE {
                self.preview_thumbnail(ext, &preview.thumbnail, cancel).await;
            }
        }

        if !message.mention_jids.is_empty() {
            let ext = extended.get_or_insert_with(new_extended);
            ext.context
                .get_or_insert_with(ContextInfo::default)
                .mentioned_jids = message.mention_jids.clone();
        }

        let location = &message.location;
        let location = (location.latitude > 0.0 || location.longitude > 0.0).then(|| LocationPayload {
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy_in_meters: location.accuracy,
            is_live: location.is_live,
            name: location.name.clone(),
            address: location.address.clone(),
            url: location.url.clone(),
            ..LocationPayload::default()
        });

        let conversation = (extended.is_none() && location.is_none()).then(|| message.body.clone());
        ProtoMessage {
            conversation,
            extended_text: extended,
            location,
            ..ProtoMessage::default()
        }
    }

    async fn preview_thumbnail(&self, ext: &mut ExtendedText, data: &[u8], cancel: &CancellationToken) {
        let converter = &self.inner.shared.converter;
        let spec = Spec {
            image_width: PREVIEW_THUMBNAIL_WIDTH,
            ..Spec::new(MimeType::JPEG)
        };

        let thumbnail = match converter.convert(cancel, data, &spec).await {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                warn!(error = %e, "Failed to convert link preview thumbnail");
                return;
            }
        };
        match converter.image_dimensions(&thumbnail).await {
            Ok((width, height)) => {
                ext.thumbnail_width = width;
                ext.thumbnail_height = height;
            }
            Err(e) => warn!(error = %e, "Failed to read link preview thumbnail size"),
        }
        ext.jpeg_thumbnail = thumbnail;
    }

    /// Ask our primary device for history older than `oldest` in the chat
    /// `resource`. Results arrive as message events.
    pub async fn request_message_history(&self, resource: &str, oldest: &Message) -> Result<()> {
        let client = self.authed("request history")?;
        let chat = Jid::parse(resource)?;
        let own = Self::own_jid(client.as_ref());

        let request = ProtoMessage {
            protocol: Some(ProtocolPayload {
                key: MessageKey::default(),
                kind: ProtocolKind::HistorySyncOnDemand {
                    chat: chat.to_string(),
                    oldest_id: oldest.id.clone(),
                    oldest_from_me: oldest.is_carbon,
                    oldest_timestamp_ms: oldest.timestamp * 1000,
                    count: self.inner.shared.config.session.history_page_size,
                },
            }),
            ..ProtoMessage::default()
        };
        let extra = SendExtra {
            peer: true,
            ..SendExtra::default()
        };

        client.send_message(&own, request, extra).await?;
        Ok(())
    }

    pub fn generate_message_id(&self) -> Result<String> {
        let client = self
            .client()
            .ok_or(GatewayError::Uninitialized("generate message ID"))?;
        Ok(client.generate_message_id())
    }

    // -----------------------------------------------------------------------
    // Presence, chat state and receipts
    // -----------------------------------------------------------------------

    pub async fn send_chat_state(&self, state: &ChatState) -> Result<()> {
        let client = self.authed("send chat state")?;
        let jid = Jid::parse(&state.jid)?;
        let presence = match state.kind {
            ChatStateKind::Composing => ChatPresence::Composing,
            ChatStateKind::Paused => ChatPresence::Paused,
        };
        client.send_chat_presence(&jid, presence).await?;
        Ok(())
    }

    /// Mark messages as read. In groups the receipt names the sender.
    pub async fn send_receipt(&self, receipt: &Receipt) -> Result<()> {
        let client = self.authed("send receipt")?;

        let (chat, sender) = if receipt.group_jid.is_empty() {
            (Jid::parse(&receipt.jid)?, None)
        } else {
            (Jid::parse(&receipt.group_jid)?, Some(Jid::parse(&receipt.jid)?))
        };
        let timestamp = DateTime::from_timestamp(receipt.timestamp, 0).unwrap_or_else(Utc::now);

        client
            .mark_read(&receipt.message_ids, timestamp, &chat, sender.as_ref())
            .await?;
        Ok(())
    }

    /// Set our own presence and, when non-empty, status message.
    pub async fn send_presence(&self, kind: PresenceKind, status: &str) -> Result<()> {
        let client = self.authed("send presence")?;

        let presence_tx = lock(&self.inner.presence_tx).clone();
        if let Some(tx) = presence_tx {
            let _ = tx.send(kind).await;
        }

        client.send_presence(kind == PresenceKind::Available).await?;
        if !status.is_empty() {
            client.set_status_message(status).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    /// Named contacts from the address book, subscribing to each one's
    /// presence. `refresh` re-syncs the address book from the server first.
    pub async fn get_contacts(&self, refresh: bool) -> Result<Vec<Contact>> {
        let client = self.authed("get contacts")?;

        if refresh {
            if let Err(e) = client.fetch_app_state(APP_STATE_CRITICAL_UNBLOCK_LOW).await {
                warn!(error = %e, "Failed to sync contact list");
            }
        }

        let mut contacts = Vec::new();
        for (jid, info) in client.contacts().await? {
            if let Err(e) = client.subscribe_presence(&jid).await {
                warn!(error = %e, "Failed to subscribe to presence");
            }
            if let Event::Contact(contact) = event::contact_event(&jid, &info) {
                contacts.push(contact);
            }
        }
        Ok(contacts)
    }

    /// Look up a phone number. Unregistered numbers yield an empty contact.
    pub async fn find_contact(&self, phone: &str) -> Result<Contact> {
        let client = self.authed("find contact")?;

        let responses = client.is_on_whatsapp(&[phone.to_string()]).await?;
        let [response] = responses.as_slice() else {
            return Err(GatewayError::InvalidLookup(phone.to_string()));
        };
        if !response.is_in || response.jid.is_empty() {
            return Ok(Contact::default());
        }

        Ok(Contact {
            jid: response.jid.to_non_ad().to_string(),
            ..Contact::default()
        })
    }

    /// Profile picture for `resource`, or an empty avatar when it has none
    /// or is hidden from us. `known_id` skips the fetch if unchanged.
    pub async fn get_avatar(&self, resource: &str, known_id: &str) -> Result<Avatar> {
        let client = self.authed("get avatar")?;
        let jid = Jid::parse(resource)?;

        match client.profile_picture(&jid, known_id).await {
            Ok(Some(picture)) => Ok(Avatar {
                id: picture.id,
                url: picture.url,
            }),
            Ok(None)
            | Err(ClientError::ProfilePictureNotSet)
            | Err(ClientError::ProfilePictureUnauthorized) => Ok(Avatar::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the picture of `resource` (our own when empty). Empty `data`
    /// removes it. Returns the new picture id.
    pub async fn set_avatar(
        &self,
        resource: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let client = self.authed("set avatar")?;
        let jid = if resource.is_empty() {
            None
        } else {
            Some(Jid::parse(resource)?)
        };

        let photo = if data.is_empty() {
            None
        } else {
            let spec = Spec::new(MimeType::JPEG);
            Some(self.inner.shared.converter.convert(cancel, data, &spec).await?)
        };

        Ok(client.set_photo(jid.as_ref(), photo).await?)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub async fn get_groups(&self) -> Result<Vec<Group>> {
        let client = self.authed("get groups")?;
        let nickname = client.push_name();
        Ok(client
            .joined_groups()
            .await?
            .iter()
            .map(|info| event::group_from_info(info, &nickname))
            .collect())
    }

    pub async fn create_group(&self, name: &str, participants: &[String]) -> Result<Group> {
        let client = self.authed("create group")?;
        if participants.is_empty() {
            return Err(GatewayError::NoParticipants);
        }
        let jids = participants
            .iter()
            .map(|p| Jid::parse(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let info = client.create_group(name, &jids).await?;
        Ok(event::group_from_info(&info, &client.push_name()))
    }

    pub async fn leave_group(&self, resource: &str) -> Result<()> {
        let client = self.authed("leave group")?;
        client.leave_group(&Jid::parse(resource)?).await?;
        Ok(())
    }

    pub async fn set_group_name(&self, resource: &str, name: &str) -> Result<()> {
        let client = self.authed("set group name")?;
        client.set_group_name(&Jid::parse(resource)?, name).await?;
        Ok(())
    }

    pub async fn set_group_topic(&self, resource: &str, topic: &str) -> Result<()> {
        let client = self.authed("set group topic")?;
        client.set_group_topic(&Jid::parse(resource)?, topic).await?;
        Ok(())
    }

    /// Add, remove, promote or demote one group member.
    pub async fn set_affiliation(
        &self,
        resource: &str,
        participant: &str,
        change: ParticipantChange,
    ) -> Result<Vec<GroupParticipant>> {
        let client = self.authed("set affiliation")?;
        let group = Jid::parse(resource)?;
        let member = Jid::parse(participant)?;

        let action = match change {
            ParticipantChange::Add => GroupParticipantAction::Add,
            ParticipantChange::Remove => GroupParticipantAction::Remove,
            ParticipantChange::Promote | ParticipantChange::Demote => GroupParticipantAction::Update,
        };

        Ok(client
            .update_participants(&group, &[member], change)
            .await?
            .into_iter()
            .map(|p| GroupParticipant {
                jid: p.jid.to_non_ad().to_string(),
                affiliation: if p.is_super_admin {
                    GroupAffiliation::Owner
                } else if p.is_admin {
                    GroupAffiliation::Admin
                } else {
                    GroupAffiliation::None
                },
                action,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn event_loop(weak: Weak<Inner>, mut events: mpsc::Receiver<RawEvent>, cancel: CancellationToken) {
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            raw = events.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        Session { inner }.handle_event(raw, &cancel).await;
    }
    debug!("Event loop stopped");
}

async fn forward_qr(
    weak: Weak<Inner>,
    client: Arc<dyn ProtocolClient>,
    mut qr: mpsc::Receiver<QrEvent>,
    cancel: CancellationToken,
) {
    loop {
        let evt = tokio::select! {
            _ = cancel.cancelled() => return,
            evt = qr.recv() => evt,
        };
        let Some(evt) = evt else {
            return;
        };
        if !client.is_connected() {
            return;
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let session = Session { inner };
        match evt {
            QrEvent::Code(code) => session.propagate(Event::QrCode(code)).await,
            QrEvent::Error(error) => {
                session
                    .propagate(Event::Connect(Connect {
                        error,
                        ..Connect::default()
                    }))
                    .await
            }
            QrEvent::Other(name) => debug!(event = %name, "Pairing event"),
        }
    }
}
