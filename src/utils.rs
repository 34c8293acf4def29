//! Utility functions for the matchmaking engine

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a whole number of seconds into a chrono duration, saturating
pub fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}

/// Check if two ratings are within the given tolerance
pub fn ratings_within_tolerance(rating1: f64, rating2: f64, tolerance: f64) -> bool {
    rating_difference(rating1, rating2) <= tolerance
}

/// Spread between the strongest and weakest team totals
pub fn max_spread(sums: &[f64]) -> f64 {
    let max = sums.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = sums.iter().cloned().fold(f64::INFINITY, f64::min);
    if sums.is_empty() {
        0.0
    } else {
        max - min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_rating_difference() {
        assert_eq!(rating_difference(1500.0, 1400.0), 100.0);
        assert_eq!(rating_difference(1400.0, 1500.0), 100.0);
        assert_eq!(rating_difference(1500.0, 1500.0), 0.0);
    }

    #[test]
    fn test_ratings_within_tolerance() {
        assert!(ratings_within_tolerance(1500.0, 1450.0, 100.0));
        assert!(!ratings_within_tolerance(1500.0, 1350.0, 100.0));
        assert!(ratings_within_tolerance(1500.0, 1500.0, 0.0));
    }

    #[test]
    fn test_max_spread() {
        assert_eq!(max_spread(&[140.0, 140.0]), 0.0);
        assert_eq!(max_spread(&[10.0, 30.0, 25.0]), 20.0);
        assert_eq!(max_spread(&[]), 0.0);
    }

    #[test]
    fn test_seconds_saturates() {
        assert_eq!(seconds(90), Duration::seconds(90));
        assert!(seconds(u64::MAX) > Duration::days(1));
    }
}
