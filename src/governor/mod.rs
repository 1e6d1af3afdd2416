//! Foreground/background resource governor
//!
//! Single owner of the process-wide visibility state. Losing foreground
//! arms one grace deadline; only when it elapses does the runtime degrade
//! (clear the search query, sweep the code cache once, stop the clock).
//! Returning to foreground cancels the deadline and resumes the clock with
//! one synchronous tick. The governor itself is a pure state machine that
//! returns effects; the runtime loop owns the actual timer.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Whether the host window is visible. Transition-driven and process-wide;
/// every other component only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityState {
    Foreground,
    Background,
}

impl VisibilityState {
    pub fn is_foreground(self) -> bool {
        self == VisibilityState::Foreground
    }
}

/// Instructions the governor hands back to the runtime loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorEffect {
    /// Start the single grace timer with the configured delay
    ArmGrace(Duration),
    /// Cancel the outstanding grace timer
    CancelGrace,
    /// Observe the clock synchronously, without waiting for the interval
    EmitSyncTick,
    /// Publish an empty search query immediately
    ClearQuery,
    /// Run the stale-cache sweep once
    SweepCache,
    /// Stop the tick source entirely
    StopClock,
}

/// State machine governing visibility transitions.
pub struct VisibilityGovernor {
    visibility: VisibilityState,
    grace_delay: Duration,
    grace_armed: bool,
    clock_running: bool,
}

impl VisibilityGovernor {
    /// Create a governor starting in the foreground with the clock running.
    pub fn new(grace_delay: Duration) -> Self {
        Self {
            visibility: VisibilityState::Foreground,
            grace_delay,
            grace_armed: false,
            clock_running: true,
        }
    }

    /// Current visibility. Read-only for everyone but the governor.
    pub fn visibility(&self) -> VisibilityState {
        self.visibility
    }

    /// Whether the tick source should be running.
    pub fn clock_running(&self) -> bool {
        self.clock_running
    }

    /// Whether a grace deadline is outstanding.
    pub fn grace_armed(&self) -> bool {
        self.grace_armed
    }

    /// Handle a host visibility signal.
    pub fn on_visibility(&mut self, next: VisibilityState) -> Vec<GovernorEffect> {
        match next {
            VisibilityState::Background => self.on_background(),
            VisibilityState::Foreground => self.on_foreground(),
        }
    }

    fn on_background(&mut self) -> Vec<GovernorEffect> {
        if self.visibility == VisibilityState::Background {
            // A repeated background signal must not schedule a second
            // grace timer.
            return Vec::new();
        }

        self.visibility = VisibilityState::Background;
        info!("Lost foreground, arming {}s grace delay", self.grace_delay.as_secs());

        if self.grace_armed {
            return Vec::new();
        }
        self.grace_armed = true;
        vec![GovernorEffect::ArmGrace(self.grace_delay)]
    }

    fn on_foreground(&mut self) -> Vec<GovernorEffect> {
        if self.visibility == VisibilityState::Foreground {
            return Vec::new();
        }

        self.visibility = VisibilityState::Foreground;
        let mut effects = Vec::new();

        if self.grace_armed {
            // Focus flicker: back before the delay elapsed, so no degrade
            // side effects run at all.
            debug!("Foreground resumed within grace delay");
            self.grace_armed = false;
            effects.push(GovernorEffect::CancelGrace);
        }

        self.clock_running = true;
        info!("Foreground resumed, clock restarted");
        effects.push(GovernorEffect::EmitSyncTick);
        effects
    }

    /// Handle the grace deadline elapsing.
    pub fn on_grace_elapsed(&mut self) -> Vec<GovernorEffect> {
        if !self.grace_armed || self.visibility == VisibilityState::Foreground {
            return Vec::new();
        }

        self.grace_armed = false;
        self.clock_running = false;
        info!("Grace delay elapsed, degrading to background mode");
        vec![
            GovernorEffect::ClearQuery,
            GovernorEffect::SweepCache,
            GovernorEffect::StopClock,
        ]
    }
}
