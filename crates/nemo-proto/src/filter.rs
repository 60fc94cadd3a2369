//! User-configured channel filter.
//!
//! A comma-separated index list restricts which channels are polled
//! and displayed.  Malformed tokens are dropped, never fatal; an empty
//! result means no filter is in effect.

use crate::model::CHANNEL_COUNT;
use tracing::warn;

/// Ordered set of unique channel indices in 1–64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    indices: Vec<u8>,
}

impl ChannelFilter {
    /// Parse a filter string.  Returns `None` when no valid index
    /// survives, which callers treat as "track all channels".
    pub fn parse(raw: &str) -> Option<Self> {
        let mut indices: Vec<u8> = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<u8>() {
                Ok(n) if (1..=CHANNEL_COUNT).contains(&n) => {
                    if !indices.contains(&n) {
                        indices.push(n);
                    }
                }
                _ => warn!("ignoring invalid channel filter token: {:?}", token),
            }
        }
        if indices.is_empty() {
            None
        } else {
            Some(Self { indices })
        }
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn contains(&self, index: u8) -> bool {
        self.indices.contains(&index)
    }

    /// The filter set plus the active index when it is nonzero and
    /// outside the set.  The active channel is always visible.
    pub fn effective_indices(&self, active: u8) -> Vec<u8> {
        let mut indices = self.indices.clone();
        if active != 0 && !indices.contains(&active) {
            indices.push(active);
        }
        indices
    }
}

/// Indices tracked for a poll cycle: the filter's effective set, or
/// the full 1–64 range when no filter is configured.
pub fn tracked_indices(filter: Option<&ChannelFilter>, active: u8) -> Vec<u8> {
    match filter {
        Some(f) => f.effective_indices(active),
        None => (1..=CHANNEL_COUNT).collect(),
    }
}
