//! Search debouncing and list projection

pub mod projector;
pub mod search;

pub use projector::{ListProjector, Projection, Truncation};
pub use search::SearchDebouncer;
