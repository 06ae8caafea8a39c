use std::time::Duration;
use tokio::time::Instant;

/// Leading/trailing coalescer for manual refresh requests.
///
/// The first request of a burst runs immediately. Any further requests inside
/// the burst collapse into a single trailing run once `window` has passed
/// without a new request.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    quiet_at: Option<Instant>,
    trailing: bool,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            quiet_at: None,
            trailing: false,
        }
    }

    /// Registers a request. Returns `true` when it should run right away.
    pub fn request(&mut self, now: Instant) -> bool {
        let leading = match self.quiet_at {
            Some(quiet_at) => now >= quiet_at && !self.trailing,
            None => true,
        };
        if !leading {
            self.trailing = true;
        }
        self.quiet_at = Some(now + self.window);
        leading
    }

    /// When the pending trailing run is due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.quiet_at.filter(|_| self.trailing)
    }

    /// Returns `true` once per burst when its trailing run is due.
    pub fn settle(&mut self, now: Instant) -> bool {
        match self.quiet_at {
            Some(quiet_at) if now >= quiet_at => {
                let fire = self.trailing;
                self.quiet_at = None;
                self.trailing = false;
                fire
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.quiet_at = None;
        self.trailing = false;
    }
}
