use thiserror::Error;
use whatsgate_media::MediaError;
use whatsgate_shared::JidError;
use whatsgate_store::StoreError;

use crate::protocol::ClientError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// A mutating call on a session with no authenticated client.
    #[error("Cannot {0} for unauthenticated session")]
    Unauthenticated(&'static str),

    /// `login` was never called.
    #[error("Cannot {0} for uninitialized session")]
    Uninitialized(&'static str),

    #[error("Refusing to pair for connected session")]
    AlreadyPaired,

    #[error("Cannot pair for empty phone number")]
    EmptyPhone,

    #[error("Cannot create group with no participants")]
    NoParticipants,

    #[error("Invalid JID: {0}")]
    InvalidJid(#[from] JidError),

    #[error("attachment file contains no data")]
    EmptyAttachment,

    #[error("attachment size {size} exceeds maximum of {max}")]
    AttachmentTooLarge { size: usize, max: usize },

    #[error("Failed looking up contact '{0}': invalid response")]
    InvalidLookup(String),

    #[error("Event dispatch queue is closed")]
    DispatchClosed,

    #[error("Protocol error: {0}")]
    Client(#[from] ClientError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
