//! Time utility functions

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Format timestamp as RFC3339
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

/// Milliseconds elapsed since `start`, saturating instead of truncating
pub fn elapsed_ms(start: Instant) -> u64 {
    duration_to_ms(start.elapsed())
}

/// Convert duration to milliseconds
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_to_ms() {
        assert_eq!(duration_to_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_to_ms(Duration::from_secs(2)), 2000);
    }
}
