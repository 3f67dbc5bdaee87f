//! Target media descriptions and their transcoder argument mapping.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

// ---------------------------------------------------------------------------
// MIME types
// ---------------------------------------------------------------------------

/// A media type, possibly carrying parameters (`audio/ogg; codecs=opus`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeType(Cow<'static, str>);

impl MimeType {
    pub const M4A: MimeType = MimeType(Cow::Borrowed("audio/mp4"));
    pub const OGG: MimeType = MimeType(Cow::Borrowed("audio/ogg"));
    pub const MP4: MimeType = MimeType(Cow::Borrowed("video/mp4"));
    pub const JPEG: MimeType = MimeType(Cow::Borrowed("image/jpeg"));
    pub const PNG: MimeType = MimeType(Cow::Borrowed("image/png"));

    pub fn new(mime: impl Into<String>) -> Self {
        Self(Cow::Owned(mime.into()))
    }

    pub const fn from_static(mime: &'static str) -> Self {
        Self(Cow::Borrowed(mime))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The media type without parameters.
    pub fn base(&self) -> &str {
        base_media_type(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for MimeType {
    fn from(s: &'static str) -> Self {
        Self::from_static(s)
    }
}

/// Strip any `;`-separated parameters from a MIME string.
pub fn base_media_type(mime: &str) -> &str {
    mime.split(';').next().unwrap_or_default().trim()
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Opus,
    Aac,
    /// Anything else reported by the prober, e.g. `alac` or `mp3`.
    Other(String),
}

impl AudioCodec {
    pub fn from_name(name: &str) -> Self {
        match name {
            "opus" => Self::Opus,
            "aac" => Self::Aac,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Other(name) => name,
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Other(name) if name == "alac" || name == "flac")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Other(String),
}

impl VideoCodec {
    pub fn from_name(name: &str) -> Self {
        match name {
            "h264" => Self::H264,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::H264 => "h264",
            Self::Other(name) => name,
        }
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Description of a media file, used both as a conversion target and as the
/// result of probing an existing file.
///
/// Numeric fields use `0` for "unset"; unset fields are left to the
/// transcoder's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub mime: MimeType,

    pub audio_codec: Option<AudioCodec>,
    pub audio_channels: u32,
    /// kbit/s
    pub audio_bit_rate: u32,
    pub audio_sample_rate: u32,

    pub video_codec: Option<VideoCodec>,
    pub video_pixel_format: Option<String>,
    pub video_frame_rate: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub video_filter: Option<String>,

    pub image_width: u32,
    pub image_height: u32,
    /// 1 to 100, lossy formats only.
    pub image_quality: u8,
    /// Input frame rate for animated images.
    pub image_frame_rate: u32,

    pub duration: Duration,
    pub strip_metadata: bool,
}

impl Spec {
    pub fn new(mime: MimeType) -> Self {
        Self {
            mime,
            ..Self::default()
        }
    }

    /// Whether this spec targets the native image path rather than ffmpeg.
    pub fn is_image(&self) -> bool {
        matches!(self.mime.base(), "image/jpeg" | "image/png")
    }

    /// Map this spec to ffmpeg output arguments.
    ///
    /// The result depends on nothing but `self`. A codec that the target
    /// container cannot carry is an error, never silently replaced.
    pub fn build_args(&self) -> Result<Vec<String>> {
        let mime = self.mime.base();
        let mut args: Vec<String> = Vec::new();

        match mime {
            "audio/ogg" | "audio/mp4" => {
                if mime == "audio/ogg" {
                    self.check_audio_codec(AudioCodec::Opus)?;
                    push(&mut args, &["-f", "ogg", "-c:a", "libopus"]);
                } else {
                    self.check_audio_codec(AudioCodec::Aac)?;
                    push(&mut args, &["-f", "ipod", "-c:a", "aac"]);
                }

                if self.audio_channels > 0 {
                    args.push("-ac".into());
                    args.push(self.audio_channels.to_string());
                }
                if self.audio_bit_rate > 0 {
                    args.push("-b:a".into());
                    args.push(format!("{}k", self.audio_bit_rate));
                }
                if self.audio_sample_rate > 0 {
                    args.push("-ar".into());
                    args.push(self.audio_sample_rate.to_string());
                }
            }
            "video/mp4" => {
                if let Some(codec) = &self.video_codec {
                    if *codec != VideoCodec::H264 {
                        return Err(MediaError::InvalidCodec {
                            mime: mime.to_string(),
                            supported: VideoCodec::H264.name().to_string(),
                            chosen: codec.name().to_string(),
                        });
                    }
                }
                self.check_audio_codec(AudioCodec::Aac)?;

                // Frame rate of animated image sources, e.g. GIF.
                if self.image_frame_rate > 0 {
                    args.push("-r".into());
                    args.push(self.image_frame_rate.to_string());
                }

                push(
                    &mut args,
                    &[
                        "-f", "mp4", "-c:v", "libx264", "-c:a", "aac",
                        "-profile:v", "baseline",
                        "-level", "3.0",
                        "-movflags", "+faststart",
                    ],
                );

                if let Some(format) = &self.video_pixel_format {
                    args.push("-pix_fmt".into());
                    args.push(format.clone());
                }
                if let Some(filter) = &self.video_filter {
                    args.push("-filter:v".into());
                    args.push(filter.clone());
                }
                if self.video_frame_rate > 0 {
                    args.push("-r".into());
                    args.push(self.video_frame_rate.to_string());
                    args.push("-g".into());
                    args.push((self.video_frame_rate * 2).to_string());
                }
                if self.audio_bit_rate > 0 {
                    args.push("-b:a".into());
                    args.push(format!("{}k", self.audio_bit_rate));
                }
                if self.audio_sample_rate > 0 {
                    args.push("-ar".into());
                    args.push(self.audio_sample_rate.to_string());
                }
            }
            // Handled natively, no transcoder arguments.
            "image/jpeg" | "image/png" => return Ok(Vec::new()),
            other => return Err(MediaError::UnknownMime(other.to_string())),
        }

        if self.strip_metadata {
            push(&mut args, &["-map_metadata", "-1"]);
        }

        Ok(args)
    }

    fn check_audio_codec(&self, supported: AudioCodec) -> Result<()> {
        match &self.audio_codec {
            Some(codec) if *codec != supported => Err(MediaError::InvalidCodec {
                mime: self.mime.base().to_string(),
                supported: supported.name().to_string(),
                chosen: codec.name().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// ffmpeg arguments for grabbing the first video frame as a JPEG.
///
/// A zero dimension keeps the aspect ratio from the other one; both zero
/// keeps the native size.
pub fn thumbnail_args(width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = ["-f", "mjpeg", "-qscale:v", "5", "-frames:v", "1", "-map_metadata", "-1"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if width > 0 || height > 0 {
        let dim = |v: u32| if v == 0 { "-1".to_string() } else { v.to_string() };
        args.push("-vf".into());
        args.push(format!("scale={}:{}", dim(width), dim(height)));
    }

    args
}
