//! ffmpeg / ffprobe subprocess driver.
//!
//! Every run is bounded by the configured timeout and a caller-supplied
//! [`CancellationToken`]. Children are spawned with `kill_on_drop`, so
//! abandoning a run (timeout, cancellation, or the caller's future being
//! dropped) also terminates the process.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::{MediaError, Result};

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

const FFMPEG_DEFAULT_ARGS: &[&str] = &["-v", "error", "-y"];
const FFPROBE_DEFAULT_ARGS: &[&str] = &["-v", "error", "-of", "json=compact=1"];

pub struct Transcoder {
    config: MediaConfig,
}

impl Transcoder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.config.ffmpeg.is_some() && self.config.ffprobe.is_some()
    }

    /// Create a `media-*` scratch file holding `data`.
    ///
    /// The file is removed when the returned handle is dropped.
    pub async fn scratch_file(&self, data: &[u8]) -> Result<NamedTempFile> {
        let file = tempfile::Builder::new()
            .prefix("media-")
            .tempfile_in(&self.config.temp_dir)?;
        if !data.is_empty() {
            tokio::fs::write(file.path(), data).await?;
        }
        Ok(file)
    }

    /// `ffmpeg -v error -y -i <input> <args> <output>`
    pub async fn ffmpeg(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        args: &[String],
    ) -> Result<()> {
        let program = self
            .config
            .ffmpeg
            .as_deref()
            .ok_or(MediaError::Unavailable(FFMPEG))?;

        let mut cmd = Command::new(program);
        cmd.args(FFMPEG_DEFAULT_ARGS)
            .arg("-i")
            .arg(input)
            .args(args)
            .arg(output);

        self.run(FFMPEG, cmd, cancel).await.map(|_| ())
    }

    /// `ffprobe -v error -of json=compact=1 -i <input> <args>`, parsed.
    ///
    /// `input` is a string rather than a path since lavfi graphs are valid
    /// inputs too.
    pub async fn ffprobe(
        &self,
        cancel: &CancellationToken,
        input: &str,
        args: &[String],
    ) -> Result<ProbeOutput> {
        let program = self
            .config
            .ffprobe
            .as_deref()
            .ok_or(MediaError::Unavailable(FFPROBE))?;

        let mut cmd = Command::new(program);
        cmd.args(FFPROBE_DEFAULT_ARGS).arg("-i").arg(input).args(args);

        let stdout = self.run(FFPROBE, cmd, cancel).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    async fn run(
        &self,
        name: &'static str,
        mut cmd: Command,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = name, command = ?cmd.as_std(), "running transcoder");

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::Unavailable(name),
            _ => MediaError::Io(e),
        })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(MediaError::Cancelled(name)),
            _ = tokio::time::sleep(self.config.timeout) => return Err(MediaError::Timeout(name)),
        };

        if !output.status.success() {
            return Err(MediaError::Process {
                program: name,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

// ---------------------------------------------------------------------------
// ffprobe output
// ---------------------------------------------------------------------------

/// The subset of ffprobe's JSON we ask for.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub frames: Vec<ProbeFrame>,
}

/// ffprobe reports some numeric fields as strings (`sample_rate`,
/// `duration`) and others as numbers (`width`); both are accepted.
#[derive(Debug, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub sample_rate: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeFrame {
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        Some(serde_json::Value::Number(n)) => n.to_string().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stream_output() {
        let json = r#"{"programs":[],"streams":[{"codec_name":"h264","width":640,"height":480,"duration":"12.500000"}]}"#;
        let out: ProbeOutput = serde_json::from_str(json).unwrap();
        let stream = &out.streams[0];
        assert_eq!(stream.codec_name.as_deref(), Some("h264"));
        assert_eq!(stream.width, Some(640));
        assert_eq!(stream.height, Some(480));
        assert_eq!(stream.sample_rate, None);
        assert_eq!(stream.duration, Some(12.5));
    }

    #[test]
    fn parse_audio_stream_with_string_numbers() {
        let json = r#"{"streams":[{"codec_name":"opus","sample_rate":"48000","duration":"N/A"}]}"#;
        let out: ProbeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.streams[0].sample_rate, Some(48000));
        assert_eq!(out.streams[0].duration, None);
    }

    #[test]
    fn parse_frame_tags() {
        let json = r#"{"frames":[{"tags":{"lavfi.astats.Overall.Peak_level":"-6.020600"}},{}]}"#;
        let out: ProbeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(out.frames.len(), 2);
        assert_eq!(
            out.frames[0].tags.get("lavfi.astats.Overall.Peak_level").map(String::as_str),
            Some("-6.020600")
        );
        assert!(out.frames[1].tags.is_empty());
    }

    #[tokio::test]
    async fn missing_binaries_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(MediaConfig {
            temp_dir: dir.path().to_path_buf(),
            ..MediaConfig::default()
        });
        let cancel = CancellationToken::new();

        let err = transcoder
            .ffmpeg(&cancel, Path::new("in"), Path::new("out"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Unavailable("ffmpeg")));

        let err = transcoder.ffprobe(&cancel, "in", &[]).await.unwrap_err();
        assert!(matches!(err, MediaError::Unavailable("ffprobe")));
    }

    #[tokio::test]
    async fn vanished_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(MediaConfig {
            temp_dir: dir.path().to_path_buf(),
            ffmpeg: Some(dir.path().join("no-such-ffmpeg")),
            ..MediaConfig::default()
        });
        let cancel = CancellationToken::new();
        let err = transcoder
            .ffmpeg(&cancel, Path::new("in"), Path::new("out"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Unavailable("ffmpeg")));
    }

    #[tokio::test]
    async fn scratch_files_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = Transcoder::new(MediaConfig {
            temp_dir: dir.path().to_path_buf(),
            ..MediaConfig::default()
        });

        let file = transcoder.scratch_file(b"hello").await.unwrap();
        let path = file.path().to_path_buf();
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("media-")));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        drop(file);
        assert!(!path.exists());
    }
}
