//! Rate-smoothed reveal of streamed text.
//!
//! Deltas arrive in bursts. The scheduler queues newly received characters
//! and releases them a few at a time on each display tick, taking bigger bites
//! as the backlog grows so the reveal never falls too far behind the network.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

/// Default display refresh interval (about 60 Hz).
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Characters released per tick for a backlog of `queue_len` characters.
pub fn batch_size(queue_len: usize) -> usize {
    match queue_len {
        n if n > 200 => 20,
        n if n > 50 => 5,
        n if n > 10 => 2,
        _ => 1,
    }
}

/// Exact number of ticks needed to drain a backlog of `queue_len`
/// characters when nothing new arrives meanwhile.
pub fn ticks_to_drain(queue_len: usize) -> usize {
    let mut remaining = queue_len;
    let mut ticks = 0;
    while remaining > 0 {
        remaining -= batch_size(remaining).min(remaining);
        ticks += 1;
    }
    ticks
}

/// Playback state for one message.
///
/// `processed` counts the bytes of the target text already enqueued, which
/// runs ahead of `displayed` by exactly the backlog.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    displayed: String,
    backlog: VecDeque<char>,
    processed: usize,
    observed: bool,
    draining: bool,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the text received so far.
    ///
    /// The first report for an already complete message (non-empty, not
    /// generating) is shown at once: it is history, not a live answer.
    pub fn update(&mut self, target: &str, generating: bool) {
        if !self.observed {
            self.observed = true;
            if !target.is_empty() && !generating {
                self.displayed = target.to_string();
                self.processed = target.len();
                return;
            }
        }

        if !self.extends_received(target) {
            debug!(
                processed = self.processed,
                target = target.len(),
                "target text no longer extends what was received, resetting playback"
            );
            self.resync(target);
            return;
        }

        let fresh = &target[self.processed..];
        if fresh.is_empty() {
            return;
        }
        self.backlog.extend(fresh.chars());
        self.processed = target.len();
        self.draining = true;
    }

    /// Release one batch from the backlog. Returns the appended text, or
    /// `None` when there was nothing to release.
    pub fn tick(&mut self) -> Option<&str> {
        if self.backlog.is_empty() {
            self.draining = false;
            return None;
        }

        let take = batch_size(self.backlog.len()).min(self.backlog.len());
        let start = self.displayed.len();
        self.displayed.extend(self.backlog.drain(..take));
        if self.backlog.is_empty() {
            self.draining = false;
        }
        Some(&self.displayed[start..])
    }

    /// Release the whole backlog at once, returning how many characters moved.
    pub fn flush(&mut self) -> usize {
        let moved = self.backlog.len();
        self.displayed.extend(self.backlog.drain(..));
        self.draining = false;
        moved
    }

    /// Forget everything, as for a fresh message.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    /// Characters received but not yet displayed.
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    /// Whether the drain loop should keep ticking.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// True when `target` starts with everything already enqueued, both the
    /// displayed text and the backlog.
    fn extends_received(&self, target: &str) -> bool {
        target.len() >= self.processed
            && target.is_char_boundary(self.processed)
            && target.starts_with(self.displayed.as_str())
            && target[self.displayed.len()..self.processed]
                .chars()
                .eq(self.backlog.iter().copied())
    }

    fn resync(&mut self, target: &str) {
        self.displayed = target.to_string();
        self.backlog.clear();
        self.processed = target.len();
        self.draining = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(scheduler: &mut PlaybackScheduler) -> usize {
        let mut ticks = 0;
        while scheduler.tick().is_some() {
            ticks += 1;
        }
        ticks
    }

    #[test]
    fn test_batch_size_tiers() {
        assert_eq!(batch_size(1), 1);
        assert_eq!(batch_size(10), 1);
        assert_eq!(batch_size(11), 2);
        assert_eq!(batch_size(50), 2);
        assert_eq!(batch_size(51), 5);
        assert_eq!(batch_size(200), 5);
        assert_eq!(batch_size(201), 20);
        assert_eq!(batch_size(10_000), 20);
    }

    #[test]
    fn test_batch_size_is_monotone() {
        for len in 1..1000 {
            assert!(batch_size(len) <= batch_size(len + 1), "not monotone at {len}");
        }
    }

    #[test]
    fn test_drain_bound_for_500() {
        // ceil(300/20) + ceil(150/5) + ceil(40/2) + 10
        let bound = 15 + 30 + 20 + 10;
        assert_eq!(ticks_to_drain(500), bound);

        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("", true);
        scheduler.update(&"x".repeat(500), true);
        assert_eq!(drain(&mut scheduler), bound);
        assert_eq!(scheduler.displayed().len(), 500);
    }

    #[test]
    fn test_history_short_circuit() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("Already answered.", false);
        assert_eq!(scheduler.displayed(), "Already answered.");
        assert_eq!(scheduler.backlog(), 0);
        assert!(!scheduler.is_draining());
    }

    #[test]
    fn test_generating_message_is_animated() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("Hi", true);
        assert_eq!(scheduler.displayed(), "");
        assert_eq!(scheduler.tick(), Some("H"));
        assert_eq!(scheduler.tick(), Some("i"));
        assert_eq!(scheduler.tick(), None);
    }

    #[test]
    fn test_no_double_enqueue() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("abc", true);
        scheduler.update("abc", true);
        assert_eq!(scheduler.backlog(), 3);
        scheduler.update("abcdef", true);
        assert_eq!(scheduler.backlog(), 6);
        drain(&mut scheduler);
        assert_eq!(scheduler.displayed(), "abcdef");
    }

    #[test]
    fn test_displayed_is_always_prefix() {
        let target = "The quick brown fox jumps over the lazy dog. ".repeat(12);
        let mut scheduler = PlaybackScheduler::new();
        let mut received = 0;
        while received < target.len() {
            received = (received + 37).min(target.len());
            scheduler.update(&target[..received], true);
            for _ in 0..3 {
                scheduler.tick();
                assert!(target.starts_with(scheduler.displayed()));
            }
        }
        drain(&mut scheduler);
        assert_eq!(scheduler.displayed(), target);
    }

    #[test]
    fn test_regression_resets() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("hello world", true);
        scheduler.tick();
        scheduler.update("new", true);
        assert_eq!(scheduler.displayed(), "new");
        assert_eq!(scheduler.backlog(), 0);
        assert!(!scheduler.is_draining());

        scheduler.update("new text", true);
        drain(&mut scheduler);
        assert_eq!(scheduler.displayed(), "new text");
    }

    #[test]
    fn test_replaced_text_of_same_or_greater_length_resyncs() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("", true);
        scheduler.update("hello", true);
        scheduler.tick();
        assert_eq!(scheduler.displayed(), "h");

        // Same length, different displayed prefix
        scheduler.update("HELLO", true);
        assert_eq!(scheduler.displayed(), "HELLO");
        assert_eq!(scheduler.backlog(), 0);

        // Longer, differing only in what was still queued
        scheduler.update("HEL", true);
        scheduler.update("HELlo there", true);
        scheduler.tick();
        assert_eq!(scheduler.displayed(), "HELl");
        scheduler.update("HELlO there, friend", true);
        drain(&mut scheduler);
        assert_eq!(scheduler.displayed(), "HELlO there, friend");
    }

    #[test]
    fn test_multibyte_units() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("", true);
        scheduler.update("你好", true);
        assert_eq!(scheduler.backlog(), 2);
        assert_eq!(scheduler.tick(), Some("你"));
        assert_eq!(scheduler.tick(), Some("好"));
    }

    #[test]
    fn test_draining_flag_restarts() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("a", true);
        assert!(scheduler.is_draining());
        scheduler.tick();
        assert!(!scheduler.is_draining());
        scheduler.update("ab", true);
        assert!(scheduler.is_draining());
    }

    #[test]
    fn test_flush() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.update("partial answer", true);
        scheduler.tick();
        assert_eq!(scheduler.flush(), 12);
        assert_eq!(scheduler.displayed(), "partial answer");
        assert!(!scheduler.is_draining());
    }
}
