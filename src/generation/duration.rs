//! Target output length resolution.

use anyhow::Result;
use candle_core::Tensor;

use crate::models::DurationPredictor;

/// Explicitly requested output length in frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duration {
    /// Same length for every example.
    Fixed(usize),
    /// One length per example.
    PerExample(Vec<usize>),
}

impl From<usize> for Duration {
    fn from(frames: usize) -> Self {
        Duration::Fixed(frames)
    }
}

impl From<Vec<usize>> for Duration {
    fn from(frames: Vec<usize>) -> Self {
        Duration::PerExample(frames)
    }
}

/// Convert a duration in seconds to a frame count.
///
/// `frames = round(seconds * sample_rate / hop_length / speed)`, never negative.
pub fn seconds_to_frames(seconds: f64, sample_rate: u32, hop_length: usize, speed: f64) -> usize {
    let frames = seconds * sample_rate as f64 / hop_length as f64 / speed;
    frames.round().max(0.0) as usize
}

/// Resolves per-example output lengths from an explicit value or a predictor.
pub struct DurationResolver<'a> {
    predictor: Option<&'a dyn DurationPredictor>,
    sample_rate: u32,
    hop_length: usize,
    max_duration: usize,
}

impl<'a> DurationResolver<'a> {
    pub fn new(
        predictor: Option<&'a dyn DurationPredictor>,
        sample_rate: u32,
        hop_length: usize,
        max_duration: usize,
    ) -> Self {
        Self {
            predictor,
            sample_rate,
            hop_length,
            max_duration,
        }
    }

    /// Output length per example, in frames.
    ///
    /// Every length is raised to at least `lens[i] + 1` so at least one frame
    /// is generated, then clipped to the configured maximum.
    pub fn resolve(
        &self,
        explicit: Option<&Duration>,
        cond: &Tensor,
        text: &Tensor,
        lens: &[usize],
        speed: f64,
    ) -> Result<Vec<usize>> {
        let batch = lens.len();
        let raw = match (explicit, self.predictor) {
            (Some(Duration::Fixed(frames)), _) => vec![*frames; batch],
            (Some(Duration::PerExample(frames)), _) => {
                anyhow::ensure!(
                    frames.len() == batch,
                    "expected {} durations, got {}",
                    batch,
                    frames.len()
                );
                frames.clone()
            }
            (None, Some(predictor)) => {
                let seconds = predictor.predict_seconds(cond, text)?;
                anyhow::ensure!(
                    seconds.len() == batch,
                    "duration predictor returned {} values for a batch of {}",
                    seconds.len(),
                    batch
                );
                let frames: Vec<usize> = seconds
                    .iter()
                    .map(|&s| seconds_to_frames(s, self.sample_rate, self.hop_length, speed))
                    .collect();
                for (f, s) in frames.iter().zip(seconds.iter()) {
                    tracing::info!(
                        "Got duration of {} frames ({:.2} secs) for generated speech.",
                        f,
                        s
                    );
                }
                frames
            }
            (None, None) => {
                anyhow::bail!("Duration must be provided or a duration predictor must be set.")
            }
        };

        Ok(self.clamp(&raw, lens))
    }

    /// Apply the `len + 1` floor and the configured ceiling.
    pub fn clamp(&self, durations: &[usize], lens: &[usize]) -> Vec<usize> {
        durations
            .iter()
            .zip(lens.iter())
            .map(|(&d, &len)| d.max(len + 1).min(self.max_duration))
            .collect()
    }
}
