use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JidError {
    #[error("empty JID")]
    Empty,

    #[error("unexpected number of '@' in JID: {0}")]
    TooManyServers(String),

    #[error("unexpected number of dots in JID: {0}")]
    TooManyDots(String),

    #[error("unexpected number of colons in JID: {0}")]
    TooManyColons(String),

    #[error("invalid agent in JID: {0}")]
    InvalidAgent(String),

    #[error("invalid device in JID: {0}")]
    InvalidDevice(String),
}
