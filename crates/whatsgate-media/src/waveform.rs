//! Peak-level waveform scaling.

use std::time::Duration;

/// ffprobe frame tag carrying the per-chunk peak level in dBFS.
pub const PEAK_LEVEL_TAG: &str = "lavfi.astats.Overall.Peak_level";

/// Audio samples per waveform chunk, so that a stream of `duration` at
/// `sample_rate` yields roughly `samples` chunks.
pub fn chunk_size(sample_rate: u32, duration: Duration, samples: usize) -> u64 {
    let total = f64::from(sample_rate) * duration.as_secs_f64();
    let per_chunk = (total as u64) / samples.max(1) as u64;
    per_chunk.max(1)
}

/// Scale dBFS peak levels to linear loudness in `0..=100`.
///
/// The output always has exactly `samples` entries: extra levels are
/// dropped, missing ones are zero.
pub fn scale_peak_levels(levels: &[f64], samples: usize) -> Vec<u8> {
    let mut out: Vec<u8> = levels
        .iter()
        .take(samples)
        .map(|db| scale_level(*db))
        .collect();
    out.resize(samples, 0);
    out
}

fn scale_level(db: f64) -> u8 {
    // Silence is reported as -inf, which scales to 0.
    let value = (10f64.powf(db / 50.0) * 100.0).round();
    if value.is_nan() {
        0
    } else {
        value.clamp(0.0, 100.0) as u8
    }
}
