use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default upper bound on a single transcoder run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the converter finds its tools and writes scratch files.
///
/// Built once at startup and handed to [`Converter::new`]; nothing in this
/// crate reads process-wide state after that.
///
/// [`Converter::new`]: crate::Converter::new
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory for `media-*` scratch files.
    pub temp_dir: PathBuf,
    /// Absolute path to `ffmpeg`, `None` if not installed.
    pub ffmpeg: Option<PathBuf>,
    /// Absolute path to `ffprobe`, `None` if not installed.
    pub ffprobe: Option<PathBuf>,
    /// Kill the transcoder after this long.
    pub timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            ffmpeg: None,
            ffprobe: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl MediaConfig {
    /// Locate `ffmpeg` and `ffprobe` on `PATH`.
    pub fn detect(temp_dir: impl Into<PathBuf>) -> Self {
        let config = Self {
            temp_dir: temp_dir.into(),
            ffmpeg: find_in_path("ffmpeg"),
            ffprobe: find_in_path("ffprobe"),
            timeout: DEFAULT_TIMEOUT,
        };

        match (&config.ffmpeg, &config.ffprobe) {
            (Some(ffmpeg), Some(ffprobe)) => tracing::debug!(
                ffmpeg = %ffmpeg.display(),
                ffprobe = %ffprobe.display(),
                "transcoder found"
            ),
            _ => tracing::warn!("ffmpeg/ffprobe not found, audio/video conversion disabled"),
        }

        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| candidates(&dir, program))
        .find(|candidate| candidate.is_file())
}

fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(format!("{program}.exe")), dir.join(program)]
    } else {
        vec![dir.join(program)]
    }
}
