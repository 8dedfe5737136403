//! Cursor jitter filtering (One Euro filter per axis).
//!
//! Slow hand motion is smoothed heavily; fast motion raises the cutoff so the
//! cursor does not lag behind a deliberate sweep.

use std::f64::consts::PI;
use tokio::time::Instant;

/// Used when two samples share a timestamp.
const FALLBACK_DT_S: f64 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizerParams {
    /// Cutoff frequency (Hz) at rest.
    pub min_cutoff: f64,
    /// How quickly the cutoff rises with speed.
    pub beta: f64,
    /// Cutoff used when filtering the derivative.
    pub derivative_cutoff: f64,
}

impl Default for StabilizerParams {
    fn default() -> Self {
        Self {
            min_cutoff: 0.1,
            beta: 5.0,
            derivative_cutoff: 1.0,
        }
    }
}

fn smoothing_alpha(cutoff: f64, dt: f64) -> f64 {
    let tau = 1.0 / (2.0 * PI * cutoff);
    1.0 / (1.0 + tau / dt)
}

#[derive(Debug, Clone)]
struct OneEuro {
    params: StabilizerParams,
    value: Option<f64>,
    derivative: f64,
}

impl OneEuro {
    fn new(params: StabilizerParams) -> Self {
        Self {
            params,
            value: None,
            derivative: 0.0,
        }
    }

    fn filter(&mut self, raw: f64, dt: f64) -> f64 {
        let Some(previous) = self.value else {
            self.value = Some(raw);
            self.derivative = 0.0;
            return raw;
        };

        let raw_derivative = (raw - previous) / dt;
        let a_d = smoothing_alpha(self.params.derivative_cutoff, dt);
        self.derivative += a_d * (raw_derivative - self.derivative);

        let cutoff = self.params.min_cutoff + self.params.beta * self.derivative.abs();
        let a = smoothing_alpha(cutoff, dt);
        let filtered = previous + a * (raw - previous);
        self.value = Some(filtered);
        filtered
    }

    fn reset(&mut self) {
        self.value = None;
        self.derivative = 0.0;
    }
}

/// Two-axis One Euro filter for one controller's cursor.
#[derive(Debug, Clone)]
pub struct PointerStabilizer {
    u: OneEuro,
    v: OneEuro,
    last_sample: Option<Instant>,
}

impl PointerStabilizer {
    pub fn new(params: StabilizerParams) -> Self {
        Self {
            u: OneEuro::new(params),
            v: OneEuro::new(params),
            last_sample: None,
        }
    }

    /// Feeds one raw sample and returns the smoothed `(u, v)`.
    pub fn update(&mut self, u: f64, v: f64, now: Instant) -> (f64, f64) {
        let dt = self
            .last_sample
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .filter(|dt| *dt > 0.0)
            .unwrap_or(FALLBACK_DT_S);
        self.last_sample = Some(now);
        (self.u.filter(u, dt), self.v.filter(v, dt))
    }

    /// Forgets history so the next sample is passed through unfiltered.
    pub fn reset(&mut self) {
        self.u.reset();
        self.v.reset();
        self.last_sample = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_sample_passes_through() {
        let mut s = PointerStabilizer::new(StabilizerParams::default());
        assert_eq!(s.update(0.4, 0.6, Instant::now()), (0.4, 0.6));
    }

    #[test]
    fn test_small_jitter_is_damped() {
        let mut s = PointerStabilizer::new(StabilizerParams::default());
        let t0 = Instant::now();
        s.update(0.5, 0.5, t0);
        let (u, _) = s.update(0.502, 0.5, t0 + Duration::from_millis(16));
        assert!(u > 0.5 && u < 0.502, "jitter should be partially absorbed, got {u}");
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut s = PointerStabilizer::new(StabilizerParams::default());
        let t0 = Instant::now();
        s.update(0.1, 0.1, t0);
        s.reset();
        assert_eq!(s.update(0.9, 0.9, t0 + Duration::from_millis(16)), (0.9, 0.9));
    }
}
