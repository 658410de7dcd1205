//! Time helpers shared across the engine.

use chrono::{DateTime, Duration, Utc};

/// A timestamp with timezone (always UTC for RateMesh).
pub type Timestamp = DateTime<Utc>;

/// Current wall-clock time.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Age of an event that happened at `t`.
pub fn age_of(t: Timestamp) -> Duration {
    now().signed_duration_since(t)
}

/// Duration extensions for convenient conversion.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
