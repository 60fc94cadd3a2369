//! Aggregation of asynchronous poll failures.
//!
//! Background workers record failures here; the next synchronous read
//! drains them as one combined error.  Delivery is at-most-once: a
//! drain clears the set.

use tokio::sync::Mutex;

#[derive(Default)]
pub struct ErrorAggregator {
    // Insertion-ordered; duplicates are not stored twice.
    messages: Mutex<Vec<String>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, message: String) {
        let mut messages = self.messages.lock().await;
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    /// Join all pending messages with newlines and clear the set.
    pub async fn drain_if_any(&self) -> Option<String> {
        let mut messages = self.messages.lock().await;
        if messages.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *messages).join("\n"))
        }
    }

    pub async fn clear(&self) {
        self.messages.lock().await.clear();
    }
}
