//! Search input debouncing
//!
//! Raw keystrokes arrive far faster than the list should re-filter. The
//! debouncer publishes a query only after input has been quiet for the
//! configured window; every new keystroke restarts the wait. The list
//! projector only ever consumes the published value.

use std::time::Duration;

use log::debug;

/// Converts a fast-changing query string into a stable, delayed one.
///
/// The runtime loop owns the actual timer; the debouncer tracks the raw
/// and published values and tells the loop when a deadline is needed.
pub struct SearchDebouncer {
    window: Duration,
    raw: String,
    published: String,
}

impl SearchDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            raw: String::new(),
            published: String::new(),
        }
    }

    /// Quiet period a caller should wait before calling [`fire`].
    ///
    /// [`fire`]: SearchDebouncer::fire
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a new raw input value. Restarts the quiet period: the caller
    /// must replace any pending deadline with a fresh one.
    pub fn input(&mut self, raw: impl Into<String>) {
        self.raw = raw.into();
    }

    /// The quiet period completed uninterrupted: publish the raw value.
    /// Returns the published query when it changed.
    pub fn fire(&mut self) -> Option<&str> {
        if self.published == self.raw {
            return None;
        }
        self.published = self.raw.clone();
        debug!("Published search query {:?}", self.published);
        Some(&self.published)
    }

    /// Drop the query entirely, bypassing the debounce. Used when the
    /// window goes to the background; the caller must also cancel any
    /// pending deadline.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.published.clear();
    }

    /// Latest raw input, not yet necessarily published.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The stable, debounced query the projector consumes.
    pub fn published(&self) -> &str {
        &self.published
    }
}
