//! OTP refresh scheduler and adaptive resource governor
//!
//! The client-side runtime behind a desktop one-time-password viewer. It
//! keeps every displayed code aligned to the shared 30-second wall-clock
//! window, bounds concurrent regeneration calls into the secret-holding
//! backend, degrades gracefully when the window loses visibility, and
//! debounces search input without disturbing timer accuracy.
//!
//! Secrets, cryptography, persistence and rendering all live elsewhere:
//! the backend is reached through the [`bridge::SecretBridge`] trait and
//! the UI consumes [`runtime::Snapshot`] values from a watch channel.

pub mod bridge;
pub mod config;
pub mod error;
pub mod governor;
pub mod runtime;
pub mod scheduler;
pub mod view;

pub use bridge::{Entry, EntryId, SecretBridge};
pub use config::RuntimeConfig;
pub use error::{BridgeError, Error, Result};
pub use governor::VisibilityState;
pub use runtime::{EntryView, OtpRuntime, Snapshot};
pub use scheduler::{CodeState, EpochTick, INVALID_SENTINEL, PENDING_PLACEHOLDER};
pub use view::Truncation;
