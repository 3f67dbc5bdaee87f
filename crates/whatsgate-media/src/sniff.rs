//! Content-type detection from leading magic bytes.

use image::ImageFormat;

/// Best-effort MIME type for `data`, `None` when nothing matched.
pub fn detect_mime(data: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(data) {
        match format {
            ImageFormat::Jpeg => return Some("image/jpeg"),
            ImageFormat::Png => return Some("image/png"),
            ImageFormat::Gif => return Some("image/gif"),
            ImageFormat::WebP => return Some("image/webp"),
            _ => {}
        }
    }

    if data.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if let Some(brand) = ftyp_brand(data) {
        return Some(match brand {
            b"M4A " | b"M4B " | b"M4P " => "audio/mp4",
            b"qt  " => "video/quicktime",
            _ => "video/mp4",
        });
    }
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let head = &data[..data.len().min(64)];
        return Some(if contains(head, b"webm") {
            "video/webm"
        } else {
            "video/x-matroska"
        });
    }
    if data.starts_with(b"ID3") || mpeg_audio_frame(data) {
        return Some("audio/mpeg");
    }
    if data.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return Some("audio/wav");
    }
    if data.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }

    None
}

// ISO base media files open with a `ftyp` box: size(4) "ftyp" brand(4).
fn ftyp_brand(data: &[u8]) -> Option<&[u8]> {
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        Some(&data[8..12])
    } else {
        None
    }
}

// MPEG audio frame header: 11 sync bits, then version, layer, bit rate and
// sample rate fields, none of which may hold its reserved value.
fn mpeg_audio_frame(data: &[u8]) -> bool {
    let [0xFF, b1, b2, ..] = *data else {
        return false;
    };
    let sync = b1 & 0xE0 == 0xE0;
    let version = (b1 >> 3) & 0x03;
    let layer = (b1 >> 1) & 0x03;
    let bit_rate = b2 >> 4;
    let sample_rate = (b2 >> 2) & 0x03;

    sync && version != 0b01 && layer != 0b00 && bit_rate != 0x0F && sample_rate != 0b11
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
