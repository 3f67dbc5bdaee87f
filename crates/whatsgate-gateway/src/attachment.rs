//! Outbound attachment classification, conversion and upload.
//!
//! The protocol only renders a handful of formats inline. Anything else is
//! converted to the closest supported format when we recognise it, or sent
//! as a plain document when we do not.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use whatsgate_media::{base_media_type, detect_mime, Converter, MimeType, Spec};
use whatsgate_shared::constants::{
    ANIMATED_IMAGE_MIME, DEFAULT_THUMBNAIL_WIDTH, MAX_CONVERT_AUDIO_VIDEO_SIZE,
    MAX_CONVERT_IMAGE_SIZE, MAX_WAVEFORM_SAMPLES, VOICE_MESSAGE_MIME,
};

use crate::error::{GatewayError, Result};
use crate::protocol::{MediaKind, MediaPayload, ProtoMessage, ProtocolClient};
use crate::types::Attachment;

/// Declared MIME for payloads we refuse to interpret.
pub const OPAQUE_MIME: &str = "application/octet-stream";

// ---------------------------------------------------------------------------
// Target specs
// ---------------------------------------------------------------------------

/// Voice notes: mono Opus in Ogg.
pub fn voice_spec() -> Spec {
    Spec {
        audio_bit_rate: 64,
        audio_channels: 1,
        audio_sample_rate: 48_000,
        strip_metadata: true,
        ..Spec::new(MimeType::from_static(VOICE_MESSAGE_MIME))
    }
}

/// Generic audio: AAC in MP4.
pub fn audio_spec() -> Spec {
    Spec {
        audio_bit_rate: 160,
        audio_sample_rate: 44_100,
        ..Spec::new(MimeType::M4A)
    }
}

/// Inline-playable video.
pub fn video_spec() -> Spec {
    Spec {
        audio_bit_rate: 160,
        audio_sample_rate: 44_100,
        video_filter: Some("pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string()),
        video_frame_rate: 25,
        video_pixel_format: Some("yuv420p".to_string()),
        strip_metadata: true,
        ..Spec::new(MimeType::MP4)
    }
}

/// Inline-previewable image.
pub fn image_spec() -> Spec {
    Spec {
        image_quality: 85,
        ..Spec::new(MimeType::JPEG)
    }
}

/// Video target for an animated GIF of `frames` frames lasting `total_ms`.
pub fn gif_spec(frames: usize, total_ms: f64) -> Spec {
    let mut spec = video_spec();
    if total_ms > 0.0 {
        spec.image_frame_rate = (frames as f64 * 1000.0 / total_ms).round() as u32;
    }
    spec
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert `attach` in place to a protocol-friendly format.
///
/// Unrecognised payloads are left alone. On any error other than a size
/// violation the attachment is unchanged apart from a corrected MIME type.
pub async fn convert_attachment(
    converter: &Converter,
    cancel: &CancellationToken,
    attach: &mut Attachment,
) -> Result<()> {
    let Some(detected) = detect_mime(&attach.data) else {
        return Ok(());
    };
    if attach.mime.is_empty() || attach.mime == OPAQUE_MIME {
        attach.mime = detected.to_string();
    }

    let Some(spec) = target_spec(converter, cancel, detected, attach).await? else {
        return Ok(());
    };

    let data = converter.convert(cancel, &attach.data, &spec).await?;
    debug!(from = detected, to = %spec.mime, "converted attachment");

    attach.data = data;
    attach.mime = spec.mime.to_string();
    // Probed metadata described the old payload.
    attach.meta = None;
    Ok(())
}

/// Pick the conversion target for a payload detected as `detected`, or
/// `None` to send it as is.
async fn target_spec(
    converter: &Converter,
    cancel: &CancellationToken,
    detected: &str,
    attach: &mut Attachment,
) -> Result<Option<Spec>> {
    match detected {
        "image/png" | "image/webp" => {
            check_size(attach, MAX_CONVERT_IMAGE_SIZE)?;
            Ok(Some(image_spec()))
        }
        "image/gif" => {
            check_size(attach, MAX_CONVERT_IMAGE_SIZE)?;
            let (frames, total_ms) = converter.gif_frames(&attach.data).await?;
            if frames == 1 {
                Ok(Some(image_spec()))
            } else {
                Ok(Some(gif_spec(frames, total_ms)))
            }
        }
        "audio/m4a" | "audio/mp4" => {
            check_size(attach, MAX_CONVERT_AUDIO_VIDEO_SIZE)?;
            if let Some(meta) = probe_cached(converter, cancel, attach).await {
                if meta.audio_codec.as_ref().is_some_and(|c| c.is_lossless()) {
                    // Keep lossless audio untouched, and stop the server from
                    // treating it as a voice note.
                    attach.mime = OPAQUE_MIME.to_string();
                    return Ok(None);
                }
            }
            Ok(Some(voice_spec()))
        }
        "audio/ogg" => {
            check_size(attach, MAX_CONVERT_AUDIO_VIDEO_SIZE)?;
            let opus = probe_cached(converter, cancel, attach)
                .await
                .is_some_and(|meta| meta.audio_codec.as_ref().is_some_and(|c| c.name() == "opus"));
            Ok(Some(if opus { voice_spec() } else { audio_spec() }))
        }
        "video/mp4" | "video/webm" => {
            check_size(attach, MAX_CONVERT_AUDIO_VIDEO_SIZE)?;
            let audio_only = probe_cached(converter, cancel, attach).await.is_some_and(|meta| {
                meta.video_width == 0
                    && meta.video_height == 0
                    && meta.audio_sample_rate > 0
                    && !meta.duration.is_zero()
            });
            Ok(Some(if audio_only { voice_spec() } else { video_spec() }))
        }
        _ => Ok(None),
    }
}

fn check_size(attach: &Attachment, max: usize) -> Result<()> {
    if attach.data.len() > max {
        return Err(GatewayError::AttachmentTooLarge {
            size: attach.data.len(),
            max,
        });
    }
    Ok(())
}

/// Probe once per payload; failures leave the cache empty.
async fn probe_cached(
    converter: &Converter,
    cancel: &CancellationToken,
    attach: &mut Attachment,
) -> Option<Spec> {
    if attach.meta.is_none() {
        match converter.probe(cancel, &attach.data).await {
            Ok(meta) => attach.meta = Some(meta),
            Err(e) => debug!(error = %e, "attachment probe failed"),
        }
    }
    attach.meta.clone()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Protocol media class for a MIME type.
pub fn media_kind(mime: &str) -> MediaKind {
    match base_media_type(mime) {
        "image/jpeg" => MediaKind::Image,
        "audio/mpeg" | "audio/mp4" | "audio/aac" | "audio/ogg" => MediaKind::Audio,
        "video/mp4" => MediaKind::Video,
        _ => MediaKind::Document,
    }
}

/// Convert and upload `attach`, returning the media message that refers to
/// it. Only a size violation or an upload failure is an error; everything
/// optional (conversion, thumbnails, waveform) degrades with a warning.
pub async fn upload_attachment(
    client: &dyn ProtocolClient,
    converter: &Converter,
    cancel: &CancellationToken,
    attach: &mut Attachment,
) -> Result<ProtoMessage> {
    let original_mime = attach.mime.clone();

    match convert_attachment(converter, cancel, attach).await {
        Ok(()) => {}
        Err(e @ GatewayError::AttachmentTooLarge { .. }) => return Err(e),
        Err(e) => warn!(error = %e, "failed to auto-convert attachment"),
    }

    if attach.data.is_empty() {
        return Err(GatewayError::EmptyAttachment);
    }

    let kind = media_kind(&attach.mime);
    let upload = client.upload(&attach.data, kind).await?;

    let mut media = MediaPayload {
        url: upload.url,
        direct_path: upload.direct_path,
        media_key: upload.media_key,
        file_enc_sha256: upload.file_enc_sha256,
        file_sha256: upload.file_sha256,
        file_length: attach.data.len() as u64,
        mimetype: attach.mime.clone(),
        caption: attach.caption.clone(),
        ..MediaPayload::default()
    };

    let mut message = ProtoMessage::default();
    match kind {
        MediaKind::Image => {
            let thumb = Spec {
                image_width: DEFAULT_THUMBNAIL_WIDTH,
                ..Spec::new(MimeType::JPEG)
            };
            match converter.convert(cancel, &attach.data, &thumb).await {
                Ok(t) => media.jpeg_thumbnail = t,
                Err(e) => warn!(error = %e, "failed generating attachment thumbnail"),
            }
            message.image = Some(media);
        }
        MediaKind::Audio => {
            let meta = metadata(converter, cancel, attach).await;
            media.seconds = seconds(meta.as_ref().map(|m| m.duration));
            if attach.mime == VOICE_MESSAGE_MIME {
                media.ptt = true;
                if let Some(meta) = &meta {
                    match converter
                        .waveform(cancel, &attach.data, meta, MAX_WAVEFORM_SAMPLES)
                        .await
                    {
                        Ok(w) => media.waveform = w,
                        Err(e) => warn!(error = %e, "failed generating attachment waveform"),
                    }
                }
            }
            message.audio = Some(media);
        }
        MediaKind::Video => {
            let meta = metadata(converter, cancel, attach).await;
            media.seconds = seconds(meta.as_ref().map(|m| m.duration));
            if let Some(meta) = &meta {
                media.width = meta.video_width;
                media.height = meta.video_height;
            }
            match converter
                .thumbnail(cancel, &attach.data, DEFAULT_THUMBNAIL_WIDTH, 0)
                .await
            {
                Ok(t) => media.jpeg_thumbnail = t,
                Err(e) => warn!(error = %e, "failed generating attachment thumbnail"),
            }
            media.gif_playback = original_mime == ANIMATED_IMAGE_MIME;
            message.video = Some(media);
        }
        MediaKind::Document => {
            media.file_name = attach.filename.clone();
            message.document = Some(media);
        }
    }

    Ok(message)
}

async fn metadata(
    converter: &Converter,
    cancel: &CancellationToken,
    attach: &mut Attachment,
) -> Option<Spec> {
    if attach.meta.is_none() {
        match converter.probe(cancel, &attach.data).await {
            Ok(meta) => attach.meta = Some(meta),
            Err(e) => warn!(error = %e, "failed fetching attachment metadata"),
        }
    }
    attach.meta.clone()
}

fn seconds(duration: Option<Duration>) -> u32 {
    duration.map(|d| d.as_secs() as u32).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// File names
// ---------------------------------------------------------------------------

/// File extension (with leading dot) for `mime`, `.bin` when unknown.
pub fn extension_by_type(mime: &str) -> String {
    let base = base_media_type(mime);
    let known = match base {
        "image/jpeg" => Some(".jpg"),
        "audio/ogg" => Some(".oga"),
        "audio/mp4" => Some(".m4a"),
        "video/mp4" => Some(".mp4"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    mime_guess::get_mime_extensions_str(base)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gif_bytes, png_bytes, test_converter, FakeClient};
    use whatsgate_media::AudioCodec;

    #[test]
    fn test_gif_frame_rate() {
        assert_eq!(gif_spec(30, 3000.0).image_frame_rate, 10);
        assert_eq!(gif_spec(3, 400.0).image_frame_rate, 8);
        assert_eq!(gif_spec(5, 0.0).image_frame_rate, 0);
        assert_eq!(gif_spec(30, 3000.0).mime, MimeType::MP4);
    }

    #[test]
    fn test_specs_build_deterministic_args() {
        for spec in [voice_spec(), audio_spec(), video_spec(), image_spec(), gif_spec(30, 3000.0)] {
            assert_eq!(spec.build_args().unwrap(), spec.clone().build_args().unwrap());
        }
        let voice = voice_spec().build_args().unwrap();
        assert!(voice.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(voice.windows(2).any(|w| w == ["-ac", "1"]));
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(media_kind("image/jpeg"), MediaKind::Image);
        assert_eq!(media_kind(VOICE_MESSAGE_MIME), MediaKind::Audio);
        assert_eq!(media_kind("audio/mpeg"), MediaKind::Audio);
        assert_eq!(media_kind("video/mp4"), MediaKind::Video);
        assert_eq!(media_kind("image/png"), MediaKind::Document);
        assert_eq!(media_kind("application/pdf"), MediaKind::Document);
    }

    #[test]
    fn test_extension_by_type() {
        assert_eq!(extension_by_type("image/jpeg"), ".jpg");
        assert_eq!(extension_by_type("audio/ogg; codecs=opus"), ".oga");
        assert_eq!(extension_by_type("audio/mp4"), ".m4a");
        assert_eq!(extension_by_type("video/mp4"), ".mp4");
        assert_eq!(extension_by_type("application/pdf"), ".pdf");
        assert_eq!(extension_by_type("application/x-not-a-type"), ".bin");
    }

    #[tokio::test]
    async fn test_png_becomes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut attach = Attachment::new("", png_bytes(8, 6));

        convert_attachment(&converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap();

        assert_eq!(attach.mime, "image/jpeg");
        assert_eq!(detect_mime(&attach.data), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_single_frame_gif_becomes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut attach = Attachment::new("image/gif", gif_bytes(1, 100));

        convert_attachment(&converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap();
        assert_eq!(attach.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn test_animated_gif_targets_video() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut attach = Attachment::new("image/gif", gif_bytes(30, 100));

        let spec = target_spec(&converter, &CancellationToken::new(), "image/gif", &mut attach)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.mime, MimeType::MP4);
        assert_eq!(spec.image_frame_rate, 10);
    }

    fn probed(mime: &str, meta: Spec) -> Attachment {
        let mut attach = Attachment::new(mime, vec![0; 64]);
        attach.meta = Some(meta);
        attach
    }

    async fn target_for(detected: &str, attach: &mut Attachment) -> Result<Option<Spec>> {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        target_spec(&converter, &CancellationToken::new(), detected, attach).await
    }

    #[tokio::test]
    async fn test_lossless_m4a_is_sent_opaque() {
        let mut attach = probed(
            "audio/mp4",
            Spec {
                audio_codec: Some(AudioCodec::from_name("alac")),
                ..Spec::default()
            },
        );

        let target = target_for("audio/mp4", &mut attach).await.unwrap();
        assert!(target.is_none());
        assert_eq!(attach.mime, OPAQUE_MIME);
    }

    #[tokio::test]
    async fn test_lossy_m4a_targets_voice() {
        let mut attach = probed(
            "audio/mp4",
            Spec {
                audio_codec: Some(AudioCodec::Aac),
                ..Spec::default()
            },
        );

        let target = target_for("audio/mp4", &mut attach).await.unwrap();
        assert_eq!(target, Some(voice_spec()));
        assert_eq!(attach.mime, "audio/mp4");
    }

    #[tokio::test]
    async fn test_ogg_target_depends_on_codec() {
        let mut opus = probed(
            "audio/ogg",
            Spec {
                audio_codec: Some(AudioCodec::Opus),
                ..Spec::default()
            },
        );
        assert_eq!(target_for("audio/ogg", &mut opus).await.unwrap(), Some(voice_spec()));

        let mut vorbis = probed(
            "audio/ogg",
            Spec {
                audio_codec: Some(AudioCodec::from_name("vorbis")),
                ..Spec::default()
            },
        );
        assert_eq!(target_for("audio/ogg", &mut vorbis).await.unwrap(), Some(audio_spec()));
    }

    #[tokio::test]
    async fn test_video_without_picture_targets_voice() {
        let mut attach = probed(
            "video/webm",
            Spec {
                audio_sample_rate: 48_000,
                duration: Duration::from_secs(3),
                ..Spec::default()
            },
        );
        assert_eq!(target_for("video/webm", &mut attach).await.unwrap(), Some(voice_spec()));

        let mut silent = probed(
            "video/mp4",
            Spec {
                video_width: 640,
                video_height: 480,
                duration: Duration::from_secs(3),
                ..Spec::default()
            },
        );
        assert_eq!(target_for("video/mp4", &mut silent).await.unwrap(), Some(video_spec()));
    }

    #[tokio::test]
    async fn test_oversized_audio_and_video_are_rejected() {
        for detected in ["audio/mp4", "audio/ogg", "video/mp4"] {
            let mut attach = Attachment::new(detected, vec![0; MAX_CONVERT_AUDIO_VIDEO_SIZE + 1]);
            attach.meta = Some(Spec::default());

            let err = target_for(detected, &mut attach).await.unwrap_err();
            assert!(
                matches!(err, GatewayError::AttachmentTooLarge { max, .. } if max == MAX_CONVERT_AUDIO_VIDEO_SIZE),
                "{detected}: {err:?}"
            );
        }

        let mut at_limit = Attachment::new("video/mp4", vec![0; MAX_CONVERT_AUDIO_VIDEO_SIZE]);
        at_limit.meta = Some(Spec::default());
        assert_eq!(target_for("video/mp4", &mut at_limit).await.unwrap(), Some(video_spec()));
    }

    #[tokio::test]
    async fn test_jpeg_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let cancel = CancellationToken::new();

        let mut jpeg = Attachment::new("", png_bytes(4, 4));
        convert_attachment(&converter, &cancel, &mut jpeg).await.unwrap();
        let before = jpeg.clone();

        convert_attachment(&converter, &cancel, &mut jpeg).await.unwrap();
        assert_eq!(jpeg.data, before.data);
        assert_eq!(jpeg.mime, before.mime);
    }

    #[tokio::test]
    async fn test_failed_conversion_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut data = b"OggS".to_vec();
        data.resize(256, 0);
        let mut attach = Attachment::new("audio/ogg", data.clone());

        // No transcoder installed in the test converter.
        let err = convert_attachment(&converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Media(_)));
        assert_eq!(attach.data, data);
        assert_eq!(attach.mime, "audio/ogg");
    }

    #[tokio::test]
    async fn test_oversized_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut data = png_bytes(2, 2);
        data.resize(MAX_CONVERT_IMAGE_SIZE + 1, 0);
        let mut attach = Attachment::new("image/png", data);

        let err = convert_attachment(&converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AttachmentTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_unknown_payload_gets_detected_mime_only() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let mut attach = Attachment::new(OPAQUE_MIME, b"%PDF-1.7 rest".to_vec());

        convert_attachment(&converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap();
        assert_eq!(attach.mime, "application/pdf");
        assert_eq!(attach.data, b"%PDF-1.7 rest");
    }

    #[tokio::test]
    async fn test_upload_image() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let client = FakeClient::paired();
        let mut attach = Attachment::new("image/png", png_bytes(200, 100)).with_caption("hi");

        let message = upload_attachment(&client, &converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap();

        let image = message.image.unwrap();
        assert_eq!(image.mimetype, "image/jpeg");
        assert_eq!(image.caption, "hi");
        assert_eq!(image.file_length, attach.data.len() as u64);
        assert!(!image.url.is_empty());
        let (w, _) = whatsgate_media::raster::image_dimensions(&image.jpeg_thumbnail).unwrap();
        assert_eq!(w, DEFAULT_THUMBNAIL_WIDTH);
        assert_eq!(client.uploads(), vec![MediaKind::Image]);
    }

    #[tokio::test]
    async fn test_upload_document() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let client = FakeClient::paired();
        let mut attach = Attachment::new("", b"%PDF-1.4 body".to_vec()).with_filename("doc.pdf");

        let message = upload_attachment(&client, &converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap();

        let doc = message.document.unwrap();
        assert_eq!(doc.mimetype, "application/pdf");
        assert_eq!(doc.file_name, "doc.pdf");
    }

    #[tokio::test]
    async fn test_upload_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let converter = test_converter(dir.path());
        let client = FakeClient::paired();
        let mut attach = Attachment::new("text/plain", Vec::new());

        let err = upload_attachment(&client, &converter, &CancellationToken::new(), &mut attach)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EmptyAttachment));
        assert!(client.uploads().is_empty());
    }
}
