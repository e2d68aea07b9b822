//! Scripted steering with change detection, standing in for a keyboard.

use netcode::ControlFlags;
use rand::Rng;
use std::time::Duration;

/// One leg of the steering pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub controls: ControlFlags,
    pub duration: Duration,
}

const STRAIGHT: ControlFlags = ControlFlags {
    rotate_left: false,
    rotate_right: false,
};
const LEFT: ControlFlags = ControlFlags {
    rotate_left: true,
    rotate_right: false,
};
const RIGHT: ControlFlags = ControlFlags {
    rotate_left: false,
    rotate_right: true,
};

/// Cycles through a steering pattern and reports flag changes.
pub struct Autopilot {
    pattern: Vec<Leg>,
    leg: usize,
    elapsed: Duration,
    current: ControlFlags,
}

impl Autopilot {
    /// A wandering pattern with randomised leg lengths.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut leg = |controls, min_ms: u64, max_ms: u64| Leg {
            controls,
            duration: Duration::from_millis(rng.gen_range(min_ms..=max_ms)),
        };

        let pattern = vec![
            leg(STRAIGHT, 600, 1500),
            leg(LEFT, 200, 700),
            leg(STRAIGHT, 600, 1500),
            leg(RIGHT, 200, 700),
        ];
        Self::with_pattern(pattern)
    }

    /// Starts flying straight; the first leg is reported on the first update.
    pub fn with_pattern(pattern: Vec<Leg>) -> Self {
        Self {
            pattern,
            leg: 0,
            elapsed: Duration::ZERO,
            current: STRAIGHT,
        }
    }

    pub fn current(&self) -> ControlFlags {
        self.current
    }

    /// Advances by `dt`; returns the new flags when they changed.
    pub fn update(&mut self, dt: Duration) -> Option<ControlFlags> {
        if self.pattern.is_empty() {
            return None;
        }

        self.elapsed += dt;
        while self.elapsed >= self.pattern[self.leg].duration {
            self.elapsed -= self.pattern[self.leg].duration;
            self.leg = (self.leg + 1) % self.pattern.len();
            if self.pattern[self.leg].duration.is_zero() {
                break;
            }
        }

        let controls = self.pattern[self.leg].controls;
        if controls == self.current {
            return None;
        }
        self.current = controls;
        Some(controls)
    }
}

impl Default for Autopilot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> Vec<Leg> {
        vec![
            Leg {
                controls: STRAIGHT,
                duration: Duration::from_millis(100),
            },
            Leg {
                controls: LEFT,
                duration: Duration::from_millis(50),
            },
        ]
    }

    #[test]
    fn test_autopilot_creation() {
        let autopilot = Autopilot::new();
        assert_eq!(autopilot.current(), STRAIGHT);
        assert_eq!(autopilot.pattern.len(), 4);
    }

    #[test]
    fn test_reports_only_changes() {
        let mut autopilot = Autopilot::with_pattern(pattern());

        assert_eq!(autopilot.update(Duration::from_millis(60)), None);
        assert_eq!(autopilot.update(Duration::from_millis(60)), Some(LEFT));
        assert_eq!(autopilot.update(Duration::from_millis(10)), None);
        assert_eq!(autopilot.update(Duration::from_millis(40)), Some(STRAIGHT));
    }

    #[test]
    fn test_long_step_wraps_pattern() {
        let mut autopilot = Autopilot::with_pattern(pattern());
        // 100 + 50 + 100 = back on the LEFT leg.
        assert_eq!(autopilot.update(Duration::from_millis(260)), Some(LEFT));
    }

    #[test]
    fn test_first_leg_reported() {
        let mut autopilot = Autopilot::with_pattern(vec![Leg {
            controls: RIGHT,
            duration: Duration::from_secs(1),
        }]);
        assert_eq!(autopilot.update(Duration::ZERO), Some(RIGHT));
        assert_eq!(autopilot.update(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_empty_pattern_is_inert() {
        let mut autopilot = Autopilot::with_pattern(Vec::new());
        assert_eq!(autopilot.update(Duration::from_secs(1)), None);
    }
}
