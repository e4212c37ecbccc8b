//! Store-side clock used to resolve server timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Issues strictly increasing microsecond timestamps.
///
/// Two commits never receive the same value, even when the wall clock
/// stalls or steps backwards, so documents ordered by a server timestamp
/// keep their commit order.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: AtomicI64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after a previously issued value (e.g. persisted on disk).
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Next timestamp in microseconds since the Unix epoch.
    pub fn next_micros(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    pub fn last_micros(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let clock = ServerClock::new();
        let mut prev = clock.next_micros();
        for _ in 0..1000 {
            let next = clock.next_micros();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn resumes_after_future_value() {
        let far_future = Utc::now().timestamp_micros() + 10_000_000;
        let clock = ServerClock::starting_after(far_future);
        assert_eq!(clock.next_micros(), far_future + 1);
        assert_eq!(clock.last_micros(), far_future + 1);
    }
}
