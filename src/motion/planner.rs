use crate::error::MotionError;

/// Evenly spaced time positions strictly inside (0, 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeStepPlanner;

impl TimeStepPlanner {
    /// `n` ascending positions `i / (n + 1)` for `i = 1..=n`.
    pub fn plan(n: usize) -> Vec<f32> {
        let denom = (n + 1) as f64;
        (1..=n).map(|i| (i as f64 / denom) as f32).collect()
    }

    /// Positions `k * step` for every `k >= 1` that stays below 1, for
    /// callers that think in time increments rather than frame counts.
    pub fn every(step: f32) -> Result<Vec<f32>, MotionError> {
        if !(step > 0.0 && step <= 1.0) {
            return Err(MotionError::InvalidTimeStep(step));
        }
        let step = step as f64;
        Ok((1..)
            .map(|k| k as f64 * step)
            .take_while(|&t| t < 1.0)
            .map(|t| t as f32)
            .collect())
    }
}
