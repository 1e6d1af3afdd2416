//! List projection
//!
//! Computes the final ordered sequence of entries to render from the full
//! entry set, the debounced query and the visibility state. Filtering is a
//! case-insensitive substring match on the display name; ordering always
//! follows the entry set's insertion order. A display cap bounds how much
//! simultaneous timer and render work the list can generate, with a
//! smaller cap while backgrounded.

use serde::{Deserialize, Serialize};

use crate::bridge::Entry;
use crate::governor::VisibilityState;

/// Rendered when the true match count exceeds the display cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    /// Entries actually projected
    pub shown: usize,
    /// Entries that matched the filter
    pub matched: usize,
}

/// The ordered sequence of entries to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub entries: Vec<Entry>,
    pub truncation: Option<Truncation>,
}

/// Combines filter, visibility and display caps into a projection.
#[derive(Debug, Clone, Copy)]
pub struct ListProjector {
    foreground_cap: usize,
    background_cap: usize,
}

impl ListProjector {
    pub fn new(foreground_cap: usize, background_cap: usize) -> Self {
        Self {
            foreground_cap,
            background_cap,
        }
    }

    /// Project the entry set for rendering.
    ///
    /// `query` is the debounced query; the raw input never reaches here.
    pub fn project(
        &self,
        entries: &[Entry],
        query: &str,
        visibility: VisibilityState,
    ) -> Projection {
        let needle = query.to_lowercase();
        let matched: Vec<&Entry> = entries
            .iter()
            .filter(|entry| needle.is_empty() || entry.name.to_lowercase().contains(&needle))
            .collect();

        let cap = match visibility {
            VisibilityState::Foreground => self.foreground_cap,
            VisibilityState::Background => self.background_cap,
        };

        let truncation = (matched.len() > cap).then_some(Truncation {
            shown: cap,
            matched: matched.len(),
        });

        Projection {
            entries: matched.into_iter().take(cap).cloned().collect(),
            truncation,
        }
    }
}
