//! Native still-image handling via the `image` crate.
//!
//! These functions are CPU-bound; async callers run them on the blocking pool.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, GenericImageView, ImageFormat};

use crate::error::{MediaError, Result};
use crate::spec::Spec;

/// Quality used when a JPEG target leaves `image_quality` unset.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Decode `data` and re-encode it as the JPEG or PNG image described by
/// `spec`, resizing when `spec` carries dimensions.
pub fn convert_image(data: &[u8], spec: &Spec) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let img = resize(img, spec.image_width, spec.image_height);

    let mut out = Vec::new();
    match spec.mime.base() {
        "image/jpeg" => {
            let quality = match spec.image_quality {
                0 => DEFAULT_JPEG_QUALITY,
                q => q.min(100),
            };
            let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
            encoder.encode_image(&img.to_rgb8())?;
        }
        "image/png" => {
            img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        }
        other => return Err(MediaError::UnknownMime(other.to_string())),
    }

    Ok(out)
}

/// Pixel dimensions of an encoded image, without a full decode where the
/// format allows it.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Count frames and sum their delays (in milliseconds) for a GIF.
pub fn inspect_gif(data: &[u8]) -> Result<(usize, f64)> {
    let decoder = GifDecoder::new(Cursor::new(data))?;

    let mut frames = 0usize;
    let mut total_ms = 0f64;
    for frame in decoder.into_frames() {
        let frame = frame?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        if denom > 0 {
            total_ms += f64::from(numer) / f64::from(denom);
        }
        frames += 1;
    }

    Ok((frames, total_ms))
}

fn resize(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if width == 0 && height == 0 {
        return img;
    }

    let (src_w, src_h) = img.dimensions();
    if src_w == 0 || src_h == 0 {
        return img;
    }

    // A zero dimension follows the other one, keeping the aspect ratio.
    let (w, h) = match (width, height) {
        (0, h) => ((f64::from(src_w) * f64::from(h) / f64::from(src_h)) as u32, h),
        (w, 0) => (w, (f64::from(src_h) * f64::from(w) / f64::from(src_w)) as u32),
        (w, h) => (w, h),
    };

    img.resize_exact(w.max(1), h.max(1), FilterType::Triangle)
}
