use chrono::Utc;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use tokio::time::Instant;

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync + 'static {
    fn now_unix(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Wall clock that advances with the tokio timer, so a paused test runtime
/// moves both the scheduler and the countdown together.
#[derive(Debug)]
pub struct AnchoredClock {
    origin_unix: u64,
    origin: Instant,
}

impl AnchoredClock {
    pub fn starting_at(origin_unix: u64) -> Self {
        Self {
            origin_unix,
            origin: Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now_unix(&self) -> u64 {
        self.origin_unix + self.origin.elapsed().as_secs()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_unix: u64) -> Self {
        Self {
            now: AtomicU64::new(now_unix),
        }
    }

    pub fn set(&self, now_unix: u64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock__follows_tokio_time() {
        let clock = AnchoredClock::starting_at(1_700_000_000);
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_unix(), 1_700_000_002);
    }

    #[test]
    fn manual_clock__moves_only_when_advanced() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_unix(), 10);
        clock.advance(5);
        assert_eq!(clock.now_unix(), 15);
        clock.set(3);
        assert_eq!(clock.now_unix(), 3);
    }
}
