//! Picks the time at which a preemptible instance gets drained.
//!
//! The platform reclaims a preemptible instance at the latest 24 hours after it was created. Draining
//! at a randomized point inside the remaining window spreads replacements out over time, so that a
//! node pool created all at once does not lose every node at the same moment.
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Maximum lifetime of a preemptible instance.
pub const PREEMPTIBLE_LIFETIME_HOURS: i64 = 24;

// The remaining window is divided in three: drain no earlier than one third in, no later than two thirds.
const WINDOW_DIVISOR_SECS: i64 = 3 * 60 * 60;
const MIN_SPAN_HOURS: i64 = 1;

const DEBUG_MIN_DELAY_MINUTES: i64 = 2;
const DEBUG_MAX_DELAY_MINUTES: i64 = 6;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    #[default]
    Normal,
    /// Drains every instance a few minutes after it is first seen.
    Debug,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineAssigner {
    mode: DrainMode,
}

impl DeadlineAssigner {
    pub fn new(mode: DrainMode) -> Self {
        DeadlineAssigner { mode }
    }

    /// Computes a drain deadline for an instance created at `created_at`.
    ///
    /// In normal mode the deadline lies in `[now + span, now + 2 * span)` hours, where `span` is a
    /// third of the hours left before the instance's forced termination (at least one hour).
    pub fn assign<R: Rng + ?Sized>(
        &self,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> DateTime<Utc> {
        match self.mode {
            DrainMode::Debug => {
                now + Duration::minutes(
                    rng.gen_range(DEBUG_MIN_DELAY_MINUTES..=DEBUG_MAX_DELAY_MINUTES),
                )
            }
            DrainMode::Normal => {
                let span = span_hours(created_at, now);
                let jitter = rng.gen_range(0..span);
                now + Duration::hours(span + jitter)
            }
        }
    }
}

/// A third of the whole hours left until `created_at + 24h`, never less than one.
fn span_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = created_at + Duration::hours(PREEMPTIBLE_LIFETIME_HOURS) - now;
    remaining
        .num_seconds()
        .div_euclid(WINDOW_DIVISOR_SECS)
        .max(MIN_SPAN_HOURS)
}
