//! Change detection between consecutive dispatches
//!
//! The first reading always qualifies. After that a reading qualifies only if
//! it moved at least `threshold` away from the last *dispatched* value, so a
//! slow drift is still reported once it accumulates past the threshold.

use crate::domain::WeightReading;

/// Deltas are compared in micro-kilograms so that a change of exactly one
/// threshold step (e.g. 1.000 -> 1.001) is not lost to binary float error.
const COMPARE_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone)]
pub struct ChangeFilter {
    threshold: f64,
    last_dispatched: Option<WeightReading>,
}

impl ChangeFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold: threshold.abs(), last_dispatched: None }
    }

    /// Decide whether `reading` should be dispatched. A qualifying reading
    /// becomes the new reference immediately, whatever happens to the POST.
    pub fn consider(&mut self, reading: WeightReading) -> bool {
        let qualifies = match self.last_dispatched {
            None => true,
            Some(last) => exceeds(reading.delta(last), self.threshold),
        };

        if qualifies {
            self.last_dispatched = Some(reading);
        }
        qualifies
    }

    pub fn last_dispatched(&self) -> Option<WeightReading> {
        self.last_dispatched
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

fn exceeds(delta: f64, threshold: f64) -> bool {
    (delta * COMPARE_SCALE).round() >= (threshold * COMPARE_SCALE).round()
}
