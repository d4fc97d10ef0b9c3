//! Resume-data bookkeeping for the shutdown drain.
//!
//! # Design
//! - `begin` records every hash asked to save resume data and arms a short deadline.
//! - Each confirmation, success or failure, removes its hash and pushes the deadline out again.
//! - The drain is over when nothing is pending or the deadline passes without a confirmation.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tinytorrent_core::InfoHash;

/// Default quiet period allowed between two resume confirmations.
pub const DEFAULT_RESUME_ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks outstanding resume-data requests.
#[derive(Debug)]
pub struct ResumeTracker {
    pending: HashSet<InfoHash>,
    deadline: Option<Instant>,
    started: bool,
    alert_timeout: Duration,
}

impl ResumeTracker {
    /// Construct an idle tracker.
    #[must_use]
    pub fn new(alert_timeout: Duration) -> Self {
        Self {
            pending: HashSet::new(),
            deadline: None,
            started: false,
            alert_timeout,
        }
    }

    /// Start waiting for `hashes`.
    pub fn begin(&mut self, hashes: impl IntoIterator<Item = InfoHash>, now: Instant) {
        self.pending.extend(hashes);
        self.started = true;
        self.deadline = Some(now + self.alert_timeout);
    }

    /// Record a confirmation. Returns `true` when the hash was pending.
    pub fn confirm(&mut self, hash: &InfoHash, now: Instant) -> bool {
        let removed = self.pending.remove(hash);
        if self.started {
            self.deadline = Some(now + self.alert_timeout);
        }
        removed
    }

    /// Whether `begin` has been called.
    #[must_use]
    pub const fn started(&self) -> bool {
        self.started
    }

    /// Whether the drain has finished, either fully confirmed or timed out.
    #[must_use]
    pub fn is_done(&self, now: Instant) -> bool {
        self.started
            && (self.pending.is_empty() || self.deadline.is_some_and(|deadline| now >= deadline))
    }

    /// Hashes still unconfirmed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> InfoHash {
        InfoHash::new([byte; 20])
    }

    #[test]
    fn finishes_once_every_hash_confirms() {
        let mut tracker = ResumeTracker::new(DEFAULT_RESUME_ALERT_TIMEOUT);
        let now = Instant::now();
        assert!(!tracker.is_done(now));

        tracker.begin([hash(1), hash(2)], now);
        assert!(tracker.confirm(&hash(1), now));
        assert!(!tracker.is_done(now));
        assert!(tracker.confirm(&hash(2), now));
        assert!(tracker.is_done(now));
    }

    #[test]
    fn confirmations_extend_the_deadline() {
        let mut tracker = ResumeTracker::new(Duration::from_secs(5));
        let start = Instant::now();
        tracker.begin([hash(1), hash(2), hash(3)], start);

        let later = start + Duration::from_secs(4);
        tracker.confirm(&hash(1), later);
        assert!(!tracker.is_done(start + Duration::from_secs(6)));
        assert!(tracker.is_done(later + Duration::from_secs(5)));
        assert_eq!(tracker.pending(), 2);
    }

    #[test]
    fn unknown_confirmations_are_ignored() {
        let mut tracker = ResumeTracker::new(DEFAULT_RESUME_ALERT_TIMEOUT);
        let now = Instant::now();
        tracker.begin([hash(1)], now);
        assert!(!tracker.confirm(&hash(9), now));
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn empty_drain_is_immediately_done() {
        let mut tracker = ResumeTracker::new(DEFAULT_RESUME_ALERT_TIMEOUT);
        let now = Instant::now();
        tracker.begin(std::iter::empty(), now);
        assert!(tracker.started());
        assert!(tracker.is_done(now));
    }
}
