//! The seam between the gateway and the wire-protocol client.
//!
//! The client library itself (handshake, encryption, multi-device sync) lives
//! outside this crate. It is driven through [`ProtocolClient`], created per
//! session by a [`ClientFactory`], and reports everything it receives as
//! [`RawEvent`]s on the channel handed to it at creation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use whatsgate_shared::Jid;
use whatsgate_store::DeviceRecord;

/// App-state patch whose completion signals a usable session.
pub const APP_STATE_CRITICAL_BLOCK: &str = "critical_block";

/// App-state patch holding the contact roster.
pub const APP_STATE_CRITICAL_UNBLOCK_LOW: &str = "critical_unblock_low";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket is already connected")]
    AlreadyConnected,

    #[error("websocket not connected")]
    NotConnected,

    #[error("that user has not set a profile picture")]
    ProfilePictureNotSet,

    #[error("the user has hidden their profile picture from you")]
    ProfilePictureUnauthorized,

    #[error("{0}")]
    Request(String),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A protocol-native message. Every sub-payload is optional; a message
/// normally carries exactly one of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtoMessage {
    pub conversation: Option<String>,
    pub extended_text: Option<ExtendedText>,
    pub image: Option<MediaPayload>,
    pub audio: Option<MediaPayload>,
    pub video: Option<MediaPayload>,
    pub document: Option<MediaPayload>,
    pub sticker: Option<MediaPayload>,
    pub contact: Option<ContactCard>,
    pub location: Option<LocationPayload>,
    pub live_location: Option<LocationPayload>,
    pub reaction: Option<ReactionPayload>,
    pub protocol: Option<ProtocolPayload>,
}

impl ProtoMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    pub participant: Option<String>,
}

/// Reply, mention and forwarding metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextInfo {
    pub stanza_id: String,
    pub participant: String,
    pub is_forwarded: bool,
    pub quoted_message: Option<Box<ProtoMessage>>,
    pub mentioned_jids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreviewType {
    #[default]
    None,
    Video,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtendedText {
    pub text: String,
    pub context: Option<ContextInfo>,
    pub preview_type: Option<PreviewType>,
    pub matched_text: String,
    pub canonical_url: String,
    pub title: String,
    pub description: String,
    pub jpeg_thumbnail: Vec<u8>,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

/// Any downloadable media message: image, audio, video, document or sticker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPayload {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub mimetype: String,
    pub caption: String,
    pub file_name: String,
    pub seconds: u32,
    pub width: u32,
    pub height: u32,
    /// Push-to-talk, i.e. a voice note.
    pub ptt: bool,
    pub gif_playback: bool,
    pub waveform: Vec<u8>,
    pub jpeg_thumbnail: Vec<u8>,
    pub context: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactCard {
    pub display_name: String,
    pub vcard: String,
    pub context: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_in_meters: u32,
    pub is_live: bool,
    pub name: String,
    pub address: String,
    pub url: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionPayload {
    pub key: MessageKey,
    pub text: String,
    pub sender_timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolPayload {
    pub key: MessageKey,
    pub kind: ProtocolKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolKind {
    Edit {
        edited: Option<Box<ProtoMessage>>,
        timestamp_ms: i64,
    },
    Revoke,
    HistorySyncOnDemand {
        chat: String,
        oldest_id: String,
        oldest_from_me: bool,
        oldest_timestamp_ms: i64,
        count: u32,
    },
    Other(String),
}

/// Routing flags for [`ProtocolClient::send_message`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendExtra {
    /// Use this message id instead of generating one.
    pub id: Option<String>,
    /// Send to our own devices only.
    pub peer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResponse {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSource {
    pub chat: Jid,
    pub sender: Jid,
    pub is_from_me: bool,
    pub is_group: bool,
    pub broadcast_list_owner: Jid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageInfo {
    pub source: MessageSource,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub push_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: ProtoMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptType {
    Delivered,
    Read,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEvent {
    pub source: MessageSource,
    pub message_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: ReceiptType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub from: Jid,
    pub unavailable: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPresenceEvent {
    pub source: MessageSource,
    pub state: ChatPresence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub topic: String,
    pub set_at: Option<DateTime<Utc>>,
    pub set_by: Jid,
}

/// A partial change to a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub jid: Jid,
    pub name: Option<String>,
    pub topic: Option<TopicInfo>,
    pub join: Vec<Jid>,
    pub leave: Vec<Jid>,
    pub promote: Vec<Jid>,
    pub demote: Vec<Jid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub jid: Jid,
    pub is_admin: bool,
    pub is_super_admin: bool,
    /// Non-zero when the server rejected this participant.
    pub error: u32,
}

/// Full group metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub jid: Jid,
    pub name: String,
    pub topic: String,
    pub topic_set_at: Option<DateTime<Utc>>,
    pub topic_set_by: Jid,
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMeta {
    pub from: Jid,
    pub timestamp: DateTime<Utc>,
    pub call_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactInfo {
    pub full_name: String,
    pub first_name: String,
    pub business_name: String,
    pub push_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySyncType {
    InitialBootstrap,
    Recent,
    OnDemand,
    PushName,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySync {
    pub sync_type: HistorySyncType,
    pub conversations: Vec<Conversation>,
    pub push_names: Vec<PushNameEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<WebMessageInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushNameEntry {
    pub id: String,
    pub push_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubType {
    Ciphertext,
    Revoke,
    CallMissedVoice,
    CallMissedVideo,
    Other(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageStatus {
    #[default]
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserReceipt {
    pub user_jid: String,
    pub receipt_timestamp: i64,
    pub read_timestamp: i64,
}

/// A message as stored in history, structurally distinct from a live
/// [`MessageEvent`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebMessageInfo {
    pub key: MessageKey,
    pub message: Option<ProtoMessage>,
    /// Unix seconds.
    pub timestamp: u64,
    pub participant: Option<String>,
    pub stub_type: Option<StubType>,
    pub stub_parameters: Vec<String>,
    pub reactions: Vec<ReactionPayload>,
    pub user_receipts: Vec<UserReceipt>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailureReason {
    LoggedOut,
    Other(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrEvent {
    Code(String),
    Error(String),
    Other(String),
}

/// Everything the protocol client reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Connected,
    PushNameSetting,
    AppStateSyncComplete { name: String },
    ConnectFailure { reason: ConnectFailureReason, message: String },
    HistorySync(HistorySync),
    Message(Box<MessageEvent>),
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
    PushName { jid: Jid, push_name: String },
    JoinedGroup(GroupInfo),
    GroupInfo(GroupUpdate),
    ChatPresence(ChatPresenceEvent),
    CallOffer(CallMeta),
    CallTerminate { meta: CallMeta, reason: String },
    LoggedOut,
    PairSuccess { id: Jid, platform: String },
    KeepAliveTimeout { error_count: u32 },
    /// Anything the gateway does not handle.
    Other(String),
}

// ---------------------------------------------------------------------------
// Client capability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PictureInfo {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnWhatsAppResponse {
    pub query: String,
    pub jid: Jid,
    pub is_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Add,
    Remove,
    Promote,
    Demote,
}

type ClientResult<T> = std::result::Result<T, ClientError>;

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Identity assigned on pairing; `None` for an unpaired device.
    fn device_id(&self) -> Option<Jid>;
    /// Our own display name, empty until the server sends it.
    fn push_name(&self) -> String;
    /// Current key material, to be persisted with the device record.
    fn credentials(&self) -> Vec<u8>;
    fn is_connected(&self) -> bool;
    fn generate_message_id(&self) -> String;

    async fn connect(&self) -> ClientResult<()>;
    async fn disconnect(&self);
    async fn logout(&self) -> ClientResult<()>;
    /// Pairing codes for an unpaired device. Must be requested before
    /// [`ProtocolClient::connect`].
    async fn qr_channel(&self) -> ClientResult<mpsc::Receiver<QrEvent>>;
    async fn pair_phone(&self, phone: &str) -> ClientResult<String>;

    async fn send_message(&self, to: &Jid, message: ProtoMessage, extra: SendExtra)
        -> ClientResult<()>;
    async fn download(&self, media: &MediaPayload) -> ClientResult<Vec<u8>>;
    async fn upload(&self, data: &[u8], kind: MediaKind) -> ClientResult<UploadResponse>;

    async fn send_chat_presence(&self, jid: &Jid, state: ChatPresence) -> ClientResult<()>;
    async fn mark_read(
        &self,
        ids: &[String],
        timestamp: DateTime<Utc>,
        chat: &Jid,
        sender: Option<&Jid>,
    ) -> ClientResult<()>;
    async fn send_presence(&self, available: bool) -> ClientResult<()>;
    async fn set_status_message(&self, status: &str) -> ClientResult<()>;

    async fn fetch_app_state(&self, name: &str) -> ClientResult<()>;
    async fn contacts(&self) -> ClientResult<Vec<(Jid, ContactInfo)>>;
    async fn subscribe_presence(&self, jid: &Jid) -> ClientResult<()>;
    async fn is_on_whatsapp(&self, phones: &[String]) -> ClientResult<Vec<OnWhatsAppResponse>>;

    async fn joined_groups(&self) -> ClientResult<Vec<GroupInfo>>;
    async fn create_group(&self, name: &str, participants: &[Jid]) -> ClientResult<GroupInfo>;
    async fn leave_group(&self, jid: &Jid) -> ClientResult<()>;
    async fn set_group_name(&self, jid: &Jid, name: &str) -> ClientResult<()>;
    async fn set_group_topic(&self, jid: &Jid, topic: &str) -> ClientResult<()>;
    async fn update_participants(
        &self,
        group: &Jid,
        participants: &[Jid],
        change: ParticipantChange,
    ) -> ClientResult<Vec<ParticipantInfo>>;

    async fn profile_picture(&self, jid: &Jid, existing_id: &str)
        -> ClientResult<Option<PictureInfo>>;
    /// Set (or with `None` data, remove) a picture. `None` jid means our own.
    async fn set_photo(&self, jid: Option<&Jid>, data: Option<Vec<u8>>) -> ClientResult<String>;
}

/// Builds protocol clients for sessions.
pub trait ClientFactory: Send + Sync {
    /// `device` is either a stored record or a fresh one awaiting pairing.
    /// The client reports its events on `events`.
    fn create(
        &self,
        device: &DeviceRecord,
        platform: &str,
        events: mpsc::Sender<RawEvent>,
    ) -> Arc<dyn ProtocolClient>;
}
