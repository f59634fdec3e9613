//! Test utilities for deterministic testing of the MSNP core
//!
//! Mock clock and small builders shared by the integration tests.

use msnp_core::protocol::mime::MimeMessage;
use msnp_core::types::{TimeSource, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
///
/// Clones share the same clock, so a test can hand one clone to the code
/// under test and advance time through another.
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    #[allow(dead_code)]
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

/// Plain text message with the given body
#[allow(dead_code)]
pub fn text_message(body: &str) -> MimeMessage {
    MimeMessage::new("text/plain; charset=UTF-8")
        .with_header("X-MMS-IM-Format", "FN=Arial; EF=; CO=0; CS=0; PF=22")
        .with_body(body.as_bytes().to_vec())
}
