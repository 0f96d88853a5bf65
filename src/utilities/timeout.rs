/*
 * mecho - readiness-multiplexed TCP echo engine
 * This is free and unencumbered software released into the public domain.
 */
use std::time::{Instant, Duration};

#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    timeout: Option<(Instant, Duration)>,
}

impl Timeout {
    pub fn start(timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.map(|duration| (Instant::now(), duration))
        }
    }

    pub fn remaining_time(&self) -> Option<Duration> {
        self.timeout.map(|(start, duration)| duration.saturating_sub(start.elapsed()))
    }

    pub fn expired(&self) -> bool {
        self.remaining_time().map(|time| time.is_zero()).unwrap_or(false)
    }
}

/// Picks the shorter of two optional waiting periods, `None` meaning "forever".
pub fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_timeout_never_expires() {
        let timeout = Timeout::start(None);
        assert_eq!(timeout.remaining_time(), None);
        assert!(!timeout.expired());
    }

    #[test]
    fn zero_timeout_is_expired_immediately() {
        let timeout = Timeout::start(Some(Duration::ZERO));
        assert_eq!(timeout.remaining_time(), Some(Duration::ZERO));
        assert!(timeout.expired());
    }

    #[test]
    fn remaining_time_counts_down() {
        let timeout = Timeout::start(Some(Duration::from_secs(60)));
        let remaining = timeout.remaining_time().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(59));
    }

    #[test]
    fn earliest_prefers_bounded_periods() {
        let short = Some(Duration::from_millis(5));
        let long = Some(Duration::from_secs(5));
        assert_eq!(earliest(short, long), short);
        assert_eq!(earliest(long, short), short);
        assert_eq!(earliest(None, long), long);
        assert_eq!(earliest(short, None), short);
        assert_eq!(earliest(None, None), None);
    }
}
