//! Normalized, protocol-agnostic payloads handed to the host.
//!
//! Addresses are plain strings in their non-AD form; timestamps are Unix
//! seconds. Every type serializes with serde so a host can marshal it over
//! whatever boundary it needs.

use std::fmt;

use serde::{Deserialize, Serialize};
use whatsgate_media::Spec;
use whatsgate_shared::{Jid, JidError};

// ---------------------------------------------------------------------------
// Linked device
// ---------------------------------------------------------------------------

/// A paired device identity. The id is credential-equivalent and is never
/// printed in full.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedDevice {
    pub id: String,
}

impl LinkedDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The device JID, or an error for an unpaired (empty) device.
    pub fn jid(&self) -> Result<Jid, JidError> {
        Jid::parse(&self.id)
    }

    pub fn is_paired(&self) -> bool {
        !self.id.is_empty()
    }
}

impl fmt::Debug for LinkedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.id.is_empty() { "<unpaired>" } else { "<redacted>" };
        f.debug_struct("LinkedDevice").field("id", &shown).finish()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[default]
    Plain,
    Edit,
    Revoke,
    Reaction,
    Attachment,
}

/// One message of any kind. Fields are reused where their meaning overlaps;
/// `jid` is the peer for direct chats and the sender for group chats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub id: String,
    pub jid: String,
    pub group_jid: String,
    /// Author of the message a reaction, reply or revoke refers to.
    pub origin_jid: String,
    pub body: String,
    pub timestamp: i64,
    /// Authored by the session's own account.
    pub is_carbon: bool,
    pub is_forwarded: bool,
    pub reply_id: String,
    pub reply_body: String,
    pub attachments: Vec<Attachment>,
    pub preview: Preview,
    pub location: Location,
    pub mention_jids: Vec<String>,
    /// Receipts known at the time of a history backfill.
    pub receipts: Vec<Receipt>,
    /// Reactions known at the time of a history backfill.
    pub reactions: Vec<Message>,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime: String,
    pub filename: String,
    pub caption: String,
    pub data: Vec<u8>,

    /// Probed media metadata, filled at most once per conversion.
    #[serde(skip)]
    pub(crate) meta: Option<Spec>,
}

impl Attachment {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
            ..Self::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("mime", &self.mime)
            .field("filename", &self.filename)
            .field("caption", &self.caption)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreviewKind {
    #[default]
    Plain,
    Video,
}

/// Link preview for a URL in the message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub kind: PreviewKind,
    pub url: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: u32,
    pub is_live: bool,
    pub name: String,
    pub address: String,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Receipts, chat states, presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    #[default]
    Delivered,
    Read,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub kind: ReceiptKind,
    pub message_ids: Vec<String>,
    pub jid: String,
    pub group_jid: String,
    pub timestamp: i64,
    pub is_carbon: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatStateKind {
    #[default]
    Composing,
    Paused,
}

/// Per-conversation typing state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    pub kind: ChatStateKind,
    pub jid: String,
    pub group_jid: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceKind {
    #[default]
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub jid: String,
    pub kind: PresenceKind,
    /// Unix seconds, `0` when unknown.
    pub last_seen: i64,
}

// ---------------------------------------------------------------------------
// Contacts, connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub jid: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: String,
    pub url: String,
}

/// A connection result: `jid` on success, `error` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    pub jid: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupAffiliation {
    #[default]
    None,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupParticipantAction {
    #[default]
    Add,
    Update,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    pub affiliation: GroupAffiliation,
    pub action: GroupParticipantAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSubject {
    pub subject: String,
    pub set_at: i64,
    pub set_by_jid: String,
}

/// A group, either complete or as a partial update where only non-empty
/// fields are meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub jid: String,
    pub name: String,
    pub subject: GroupSubject,
    /// Our own nickname in the group.
    pub nickname: String,
    pub participants: Vec<GroupParticipant>,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Incoming,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub state: CallState,
    pub jid: String,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Unknown,
    QrCode,
    Pair,
    Connect,
    LoggedOut,
    Contact,
    Presence,
    Message,
    ChatState,
    Receipt,
    Group,
    Call,
}

/// A normalized event. `Unknown` means "discard" and is never delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Event {
    Unknown,
    QrCode(String),
    /// The newly paired device id.
    Pair(String),
    Connect(Connect),
    LoggedOut,
    Contact(Contact),
    Presence(Presence),
    Message(Box<Message>),
    ChatState(ChatState),
    Receipt(Receipt),
    Group(Group),
    Call(Call),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Unknown => EventKind::Unknown,
            Event::QrCode(_) => EventKind::QrCode,
            Event::Pair(_) => EventKind::Pair,
            Event::Connect(_) => EventKind::Connect,
            Event::LoggedOut => EventKind::LoggedOut,
            Event::Contact(_) => EventKind::Contact,
            Event::Presence(_) => EventKind::Presence,
            Event::Message(_) => EventKind::Message,
            Event::ChatState(_) => EventKind::ChatState,
            Event::Receipt(_) => EventKind::Receipt,
            Event::Group(_) => EventKind::Group,
            Event::Call(_) => EventKind::Call,
        }
    }

    pub fn message(message: Message) -> Self {
        Event::Message(Box::new(message))
    }
}
