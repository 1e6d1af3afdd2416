//! Shared 30-second epoch clock
//!
//! Every displayed code is valid for the same wall-clock window,
//! `window_id = floor(unix_seconds / 30)`. The clock here only observes
//! time and detects window boundaries; the 1-second cadence itself lives
//! in the runtime loop, which stops observing entirely while backgrounded.

use std::sync::Arc;

use chrono::Utc;

/// Length of one OTP validity window, in seconds.
pub const WINDOW_SECS: i64 = 30;

/// Source of wall-clock time, seam for deterministic tests.
///
/// The backend's time source is authoritative for code validity; this one
/// only drives the countdown display and boundary detection.
pub trait TimeSource: Send + Sync {
    /// Current unix time in whole seconds.
    fn now_unix(&self) -> i64;
}

/// Production time source backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Manually advanced time source, for tests that need to place window
/// boundaries exactly.
#[derive(Debug, Default)]
pub struct ManualTimeSource(std::sync::atomic::AtomicI64);

impl ManualTimeSource {
    pub fn new(start: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(start))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, unix: i64) {
        self.0.store(unix, std::sync::atomic::Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_unix(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// One observation of the epoch clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochTick {
    /// Seconds left in the current window, 1..=30
    pub seconds_remaining: u32,
    /// Identifier of the current window
    pub window_id: u64,
}

impl EpochTick {
    /// Derive a tick from unix seconds.
    ///
    /// A fresh window reports 30 seconds remaining, so the value never
    /// reaches 0: the instant it would, the next window has begun.
    pub fn from_unix(unix: i64) -> Self {
        let unix = unix.max(0);
        Self {
            seconds_remaining: (WINDOW_SECS - unix.rem_euclid(WINDOW_SECS)) as u32,
            window_id: (unix / WINDOW_SECS) as u64,
        }
    }

    /// Fraction of the window still remaining, for progress rendering.
    pub fn progress(&self) -> f64 {
        f64::from(self.seconds_remaining) / WINDOW_SECS as f64
    }
}

/// Boundary detector over a [`TimeSource`].
///
/// `observe` reports the current tick and whether the window advanced
/// since the previous observation. The boundary flag fires at most once
/// per window no matter how many ticks land inside it; it is the sole
/// trigger for regeneration.
pub struct EpochClock {
    time: Arc<dyn TimeSource>,
    last_window: Option<u64>,
}

impl EpochClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            last_window: None,
        }
    }

    /// Observe the clock, returning the tick and whether this observation
    /// crossed a window boundary.
    ///
    /// The first observation after construction is not a boundary; initial
    /// code generation is driven by entry mount, not by the clock.
    pub fn observe(&mut self) -> (EpochTick, bool) {
        let tick = EpochTick::from_unix(self.time.now_unix());
        // Any window change counts, including a backward clock jump.
        let boundary = self
            .last_window
            .is_some_and(|last| last != tick.window_id);
        self.last_window = Some(tick.window_id);
        (tick, boundary)
    }

    /// The window id seen on the most recent observation.
    pub fn current_window(&self) -> Option<u64> {
        self.last_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_from_unix() {
        let tick = EpochTick::from_unix(90);
        assert_eq!(tick.window_id, 3);
        assert_eq!(tick.seconds_remaining, 30);

        let tick = EpochTick::from_unix(91);
        assert_eq!(tick.window_id, 3);
        assert_eq!(tick.seconds_remaining, 29);

        let tick = EpochTick::from_unix(119);
        assert_eq!(tick.window_id, 3);
        assert_eq!(tick.seconds_remaining, 1);

        let tick = EpochTick::from_unix(120);
        assert_eq!(tick.window_id, 4);
        assert_eq!(tick.seconds_remaining, 30);
    }

    #[test]
    fn test_seconds_remaining_never_zero() {
        for unix in 0..120 {
            let tick = EpochTick::from_unix(unix);
            assert!(tick.seconds_remaining >= 1);
            assert!(tick.seconds_remaining <= 30);
        }
    }

    #[test]
    fn test_first_observation_is_not_a_boundary() {
        let time = Arc::new(ManualTimeSource::new(95));
        let mut clock = EpochClock::new(time);

        let (tick, boundary) = clock.observe();
        assert_eq!(tick.window_id, 3);
        assert!(!boundary);
    }

    #[test]
    fn test_boundary_fires_once_per_window() {
        let time = Arc::new(ManualTimeSource::new(89));
        let mut clock = EpochClock::new(time.clone());

        clock.observe();

        let mut boundaries = 0;
        for _ in 0..35 {
            time.advance(1);
            let (_, boundary) = clock.observe();
            if boundary {
                boundaries += 1;
            }
        }
        // 89 -> 124 crosses windows at 90 and 120.
        assert_eq!(boundaries, 2);
    }

    #[test]
    fn test_non_boundary_ticks_do_not_signal() {
        let time = Arc::new(ManualTimeSource::new(91));
        let mut clock = EpochClock::new(time.clone());
        clock.observe();

        for _ in 0..10 {
            time.advance(1);
            let (_, boundary) = clock.observe();
            assert!(!boundary);
        }
    }

    #[test]
    fn test_backward_jump_counts_as_boundary() {
        let time = Arc::new(ManualTimeSource::new(300));
        let mut clock = EpochClock::new(time.clone());
        clock.observe();

        time.advance(-120);
        let (tick, boundary) = clock.observe();
        assert!(boundary);
        assert_eq!(tick.window_id, 6);
    }

    #[test]
    fn test_progress() {
        let tick = EpochTick::from_unix(0);
        assert!((tick.progress() - 1.0).abs() < f64::EPSILON);

        let tick = EpochTick::from_unix(15);
        assert!((tick.progress() - 0.5).abs() < f64::EPSILON);
    }
}
