//! Media conversion for the gateway.
//!
//! A [`Spec`] describes a target encoding; the [`Converter`] produces it,
//! either through an external `ffmpeg` / `ffprobe` install (audio and video)
//! or natively (JPEG and PNG). Nothing here reads process-wide state: tool
//! paths, temp dir and timeout come from the [`MediaConfig`] given at
//! construction.

pub mod config;
pub mod converter;
pub mod error;
pub mod raster;
pub mod sniff;
pub mod spec;
pub mod transcoder;
pub mod waveform;

pub use config::MediaConfig;
pub use converter::Converter;
pub use error::{MediaError, Result};
pub use sniff::detect_mime;
pub use spec::{base_media_type, thumbnail_args, AudioCodec, MimeType, Spec, VideoCodec};
pub use waveform::scale_peak_levels;
