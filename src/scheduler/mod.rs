//! OTP refresh scheduling
//!
//! The epoch clock aligns all codes to the shared 30-second window, the
//! coordinator owns per-entry refresh state, and the limiter bounds how
//! many regeneration calls may be outstanding against the backend.

pub mod clock;
pub mod coordinator;
pub mod limiter;

pub use clock::{EpochClock, EpochTick, ManualTimeSource, SystemTimeSource, TimeSource, WINDOW_SECS};
pub use coordinator::{
    CodeSlot, CodeState, INVALID_SENTINEL, PENDING_PLACEHOLDER, RefreshCoordinator, RefreshRequest,
};
pub use limiter::{ConcurrencyLimiter, Slot};
