use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::raster;
use crate::spec::{thumbnail_args, AudioCodec, Spec, VideoCodec};
use crate::transcoder::{ProbeOutput, Transcoder};
use crate::waveform::{self, PEAK_LEVEL_TAG};

/// Media conversion and inspection front-end.
///
/// Audio and video go through the external transcoder, JPEG/PNG targets are
/// encoded natively. All scratch files live in the configured temp dir and
/// are removed when the owning call returns, fails or is cancelled.
pub struct Converter {
    transcoder: Transcoder,
}

impl Converter {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            transcoder: Transcoder::new(config),
        }
    }

    pub fn config(&self) -> &MediaConfig {
        self.transcoder.config()
    }

    /// Whether audio/video conversion and probing can run at all.
    pub fn is_available(&self) -> bool {
        self.transcoder.is_available()
    }

    /// Convert `data` to the format described by `spec`.
    pub async fn convert(
        &self,
        cancel: &CancellationToken,
        data: &[u8],
        spec: &Spec,
    ) -> Result<Vec<u8>> {
        match spec.mime.base() {
            "audio/ogg" | "audio/mp4" | "video/mp4" => {
                let args = spec.build_args()?;
                let input = self.transcoder.scratch_file(data).await?;
                let output = self.transcoder.scratch_file(&[]).await?;

                self.transcoder
                    .ffmpeg(cancel, input.path(), output.path(), &args)
                    .await?;

                let out = tokio::fs::read(output.path()).await?;
                debug!(mime = %spec.mime, from = data.len(), to = out.len(), "converted media");
                Ok(out)
            }
            "image/jpeg" | "image/png" => {
                let data = data.to_vec();
                let spec = spec.clone();
                tokio::task::spawn_blocking(move || raster::convert_image(&data, &spec)).await?
            }
            other => Err(MediaError::UnknownMime(other.to_string())),
        }
    }

    /// Probe `data` for codec, dimensions, sample rate and duration.
    ///
    /// Only the first stream is inspected; the result is a partially filled
    /// [`Spec`] with no MIME type.
    pub async fn probe(&self, cancel: &CancellationToken, data: &[u8]) -> Result<Spec> {
        let input = self.transcoder.scratch_file(data).await?;
        let input_path = input.path().to_string_lossy().into_owned();

        let out = self
            .transcoder
            .ffprobe(
                cancel,
                &input_path,
                &[
                    "-show_entries".to_string(),
                    "stream=codec_name,width,height,sample_rate,duration".to_string(),
                ],
            )
            .await?;

        spec_from_probe(&out)
    }

    /// First video frame as JPEG, optionally scaled.
    ///
    /// Only video is handled. Documents such as PDFs are sent without a
    /// page preview since no document renderer is linked in.
    pub async fn thumbnail(
        &self,
        cancel: &CancellationToken,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let input = self.transcoder.scratch_file(data).await?;
        let output = self.transcoder.scratch_file(&[]).await?;

        self.transcoder
            .ffmpeg(cancel, input.path(), output.path(), &thumbnail_args(width, height))
            .await?;

        Ok(tokio::fs::read(output.path()).await?)
    }

    /// Linear loudness samples in `0..=100`, exactly `samples` long.
    ///
    /// `spec` must carry the sample rate and duration of `data`, as returned
    /// by [`Converter::probe`].
    pub async fn waveform(
        &self,
        cancel: &CancellationToken,
        data: &[u8],
        spec: &Spec,
        samples: usize,
    ) -> Result<Vec<u8>> {
        if spec.audio_sample_rate == 0 || spec.duration.is_zero() {
            return Err(MediaError::MissingAudioInfo);
        }

        let input = self.transcoder.scratch_file(data).await?;
        let chunk = waveform::chunk_size(spec.audio_sample_rate, spec.duration, samples);
        let graph = format!(
            "amovie={},asetnsamples={chunk},astats=metadata=1:reset=1",
            input.path().display()
        );

        let out = self
            .transcoder
            .ffprobe(
                cancel,
                &graph,
                &[
                    "-f".to_string(),
                    "lavfi".to_string(),
                    "-show_entries".to_string(),
                    format!("frame_tags={PEAK_LEVEL_TAG}"),
                ],
            )
            .await?;

        if out.frames.is_empty() {
            return Err(MediaError::NoFrames);
        }

        let levels: Vec<f64> = out
            .frames
            .iter()
            .filter_map(|frame| frame.tags.get(PEAK_LEVEL_TAG))
            .filter_map(|v| v.parse().ok())
            .collect();

        Ok(waveform::scale_peak_levels(&levels, samples))
    }

    /// Frame count and total delay in milliseconds of an animated GIF.
    pub async fn gif_frames(&self, data: &[u8]) -> Result<(usize, f64)> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || raster::inspect_gif(&data)).await?
    }

    /// Pixel dimensions of a still image.
    pub async fn image_dimensions(&self, data: &[u8]) -> Result<(u32, u32)> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || raster::image_dimensions(&data)).await?
    }
}

fn spec_from_probe(out: &ProbeOutput) -> Result<Spec> {
    let stream = out.streams.first().ok_or(MediaError::NoStreams)?;

    let mut spec = Spec {
        video_width: stream.width.unwrap_or_default(),
        video_height: stream.height.unwrap_or_default(),
        audio_sample_rate: stream.sample_rate.unwrap_or_default(),
        duration: stream
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default(),
        ..Spec::default()
    };

    if let Some(name) = &stream.codec_name {
        if spec.video_width > 0 || spec.video_height > 0 {
            spec.video_codec = Some(VideoCodec::from_name(name));
        } else {
            spec.audio_codec = Some(AudioCodec::from_name(name));
        }
    }

    Ok(spec)
}
