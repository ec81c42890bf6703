//! Rolling-window token accounting for throttle hints.
//!
//! Counts are approximate "audio-equivalent tokens" (the lifecycle feeds
//! one event per transmitted chunk, counting its milliseconds). The
//! decision is advisory: the core never drops frames on it.

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LocalAudio,
    RemoteAudio,
}

#[derive(Debug, Clone, Copy)]
struct TokenEvent {
    at: Instant,
    count: u64,
    #[allow(dead_code)]
    kind: TokenKind,
}

/// Append-only event log pruned to the trailing window on every read.
/// Process-wide: survives across capture sessions until reset.
pub struct TokenRateTracker {
    events: Vec<TokenEvent>,
}

impl TokenRateTracker {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn add_event(&mut self, count: u64, kind: TokenKind) {
        self.add_event_at(Instant::now(), count, kind);
    }

    pub fn tokens_in_window(&mut self) -> u64 {
        self.tokens_in_window_at(Instant::now())
    }

    /// True iff the window total has reached `throttle_at_percent` of the
    /// per-minute budget.
    pub fn should_throttle(&mut self, max_per_minute: u64, throttle_at_percent: u8) -> bool {
        self.should_throttle_at(Instant::now(), max_per_minute, throttle_at_percent)
    }

    pub fn reset(&mut self) {
        self.events.clear();
    }

    pub(crate) fn add_event_at(&mut self, at: Instant, count: u64, kind: TokenKind) {
        self.events.push(TokenEvent { at, count, kind });
        self.prune(at);
    }

    pub(crate) fn tokens_in_window_at(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.events.iter().map(|e| e.count).sum()
    }

    pub(crate) fn should_throttle_at(
        &mut self,
        now: Instant,
        max_per_minute: u64,
        throttle_at_percent: u8,
    ) -> bool {
        let threshold = max_per_minute * u64::from(throttle_at_percent) / 100;
        self.tokens_in_window_at(now) >= threshold
    }

    fn prune(&mut self, now: Instant) {
        self.events
            .retain(|e| now.duration_since(e.at) <= WINDOW);
    }
}

impl Default for TokenRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_threshold_boundary() {
        let mut tracker = TokenRateTracker::new();
        let now = Instant::now();

        tracker.add_event_at(now, 74, TokenKind::LocalAudio);
        assert!(!tracker.should_throttle_at(now, 100, 75));

        tracker.add_event_at(now, 2, TokenKind::LocalAudio);
        assert!(tracker.should_throttle_at(now, 100, 75));
    }

    #[test]
    fn test_old_events_age_out() {
        let mut tracker = TokenRateTracker::new();
        let start = Instant::now();

        tracker.add_event_at(start, 50, TokenKind::RemoteAudio);
        assert_eq!(tracker.tokens_in_window_at(start), 50);

        let later = start + Duration::from_secs(61);
        assert_eq!(tracker.tokens_in_window_at(later), 0);
    }

    #[test]
    fn test_mixed_kinds_count_together() {
        let mut tracker = TokenRateTracker::new();
        let now = Instant::now();
        tracker.add_event_at(now, 10, TokenKind::LocalAudio);
        tracker.add_event_at(now, 15, TokenKind::RemoteAudio);
        assert_eq!(tracker.tokens_in_window_at(now), 25);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut tracker = TokenRateTracker::new();
        let now = Instant::now();
        tracker.add_event_at(now, 99, TokenKind::LocalAudio);
        tracker.reset();
        assert_eq!(tracker.tokens_in_window_at(now), 0);
    }

    #[test]
    fn test_empty_window_never_throttles_with_budget() {
        let mut tracker = TokenRateTracker::new();
        let now = Instant::now();
        assert!(!tracker.should_throttle_at(now, 100, 75));
        // A zero threshold throttles immediately by definition.
        assert!(tracker.should_throttle_at(now, 0, 75));
    }
}
