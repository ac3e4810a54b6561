use std::time::Duration;

use crate::config::RunConfig;

/// Pure function from elapsed run time to target active-VU count.
///
/// The timeline is ramp-up (0 → vus, linear), hold (vus, for `duration` when
/// set), ramp-down (vus → 0, linear). Keeping this a plain value sampled by
/// the control loop keeps the timing logic testable without threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampProfile {
    vus: usize,
    ramp_up: Duration,
    hold: Option<Duration>,
    ramp_down: Duration,
}

impl RampProfile {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            vus: config.vus,
            ramp_up: config.ramp_up,
            hold: config.duration,
            ramp_down: config.ramp_down,
        }
    }

    pub fn new(vus: usize, ramp_up: Duration, hold: Option<Duration>, ramp_down: Duration) -> Self {
        Self {
            vus,
            ramp_up,
            hold,
            ramp_down,
        }
    }

    /// Total run length, or `None` for iteration-capped runs with no
    /// duration, which end when every VU exhausts its cap.
    pub fn total(&self) -> Option<Duration> {
        self.hold
            .map(|hold| self.ramp_up + hold + self.ramp_down)
    }

    /// Target active-VU count at `elapsed`, by linear interpolation.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        if elapsed < self.ramp_up {
            let fraction = elapsed.as_secs_f64() / self.ramp_up.as_secs_f64();
            return interpolate(self.vus, fraction);
        }
        let after_ramp = elapsed - self.ramp_up;
        let Some(hold) = self.hold else {
            // Iteration-capped run: hold at full concurrency indefinitely.
            return self.vus;
        };
        if after_ramp < hold {
            return self.vus;
        }
        let into_down = after_ramp - hold;
        if self.ramp_down.is_zero() || into_down >= self.ramp_down {
            return 0;
        }
        let fraction = 1.0 - into_down.as_secs_f64() / self.ramp_down.as_secs_f64();
        interpolate(self.vus, fraction)
    }
}

fn interpolate(vus: usize, fraction: f64) -> usize {
    ((vus as f64) * fraction.clamp(0.0, 1.0)).round() as usize
}
