use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    /// The external transcoder binary is not installed.
    #[error("{0} command not found")]
    Unavailable(&'static str),

    #[error("media with MIME type {mime} only support codec {supported} currently, invalid codec {chosen} chosen")]
    InvalidCodec {
        mime: String,
        supported: String,
        chosen: String,
    },

    #[error("cannot process media specification for empty or unknown MIME type '{0}'")]
    UnknownMime(String),

    #[error("{program} exited with {status}: {stderr}")]
    Process {
        program: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0} cancelled")]
    Cancelled(&'static str),

    #[error("no valid audio/video streams found in data")]
    NoStreams,

    #[error("no audio frames found in media")]
    NoFrames,

    #[error("no sample-rate or duration for media given")]
    MissingAudioInfo,

    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Probe output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
