//! Audio level analysis
//!
//! Decides whether a recording's microphone audio is quiet enough that the
//! transcript pipeline should be skipped for the scene.

/// Mean absolute sample magnitude below which audio counts as silent.
pub const SILENCE_THRESHOLD: f32 = 0.01;

/// Average absolute magnitude across a decoded sample buffer.
pub fn average_magnitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// True when the decoded buffer is effectively silent.
pub fn is_silent(samples: &[f32]) -> bool {
    average_magnitude(samples) < SILENCE_THRESHOLD
}
