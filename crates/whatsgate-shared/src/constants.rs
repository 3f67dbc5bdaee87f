/// Host part for user JIDs.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Host part for group JIDs.
pub const GROUP_SERVER: &str = "g.us";

/// Host part for broadcast lists and status updates.
pub const BROADCAST_SERVER: &str = "broadcast";

/// User part of the status broadcast JID (`status@broadcast`).
pub const STATUS_BROADCAST_USER: &str = "status";

/// Host part for hidden-user JIDs.
pub const HIDDEN_USER_SERVER: &str = "lid";

/// Maximum number of in-flight calls queued for the host before producers block
pub const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Consecutive keep-alive failures tolerated before forcing a reconnect
pub const KEEPALIVE_FAILURE_THRESHOLD: u32 = 3;

/// Lower bound on the wait between reconnect attempts, in seconds
pub const RECONNECT_MIN_INTERVAL_SECS: u64 = 5;

/// Upper bound on the wait between reconnect attempts, in seconds (5 minutes)
pub const RECONNECT_MAX_INTERVAL_SECS: u64 = 5 * 60;

/// Base interval for re-requesting contact presences, in seconds (12 hours)
pub const PRESENCE_REFRESH_SECS: u64 = 12 * 60 * 60;

/// Page size for on-demand history requests
pub const MAX_HISTORY_SYNC_MESSAGES: u32 = 50;

/// MIME type of voice notes
pub const VOICE_MESSAGE_MIME: &str = "audio/ogg; codecs=opus";

/// MIME type of animated images
pub const ANIMATED_IMAGE_MIME: &str = "image/gif";

/// Largest image we will try to convert (10 MiB)
pub const MAX_CONVERT_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Largest audio/video file we will try to convert (20 MiB)
pub const MAX_CONVERT_AUDIO_VIDEO_SIZE: usize = 20 * 1024 * 1024;

/// Largest link-preview thumbnail we forward (500 KiB)
pub const MAX_PREVIEW_THUMBNAIL_SIZE: usize = 500 * 1024;

/// Number of samples in a voice-note waveform
pub const MAX_WAVEFORM_SAMPLES: usize = 64;

/// Width of attachment thumbnails, in pixels
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 100;

/// Width of link-preview thumbnails, in pixels
pub const PREVIEW_THUMBNAIL_WIDTH: u32 = 250;
