//! Authentication ticket cache
//!
//! Tickets obtained from the authentication service are cached per set of
//! credentials. The key is a SHA-256 digest so plaintext passwords are never
//! held. Expired tickets are purged lazily, at most once per cleanup interval.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::config::TicketCacheConfig;
use crate::types::{Account, TimeSource, Timestamp};

/// Cache key for a set of credentials
pub fn credentials_key(account: &Account, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached ticket and its validity window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTicket {
    pub ticket: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

impl CachedTicket {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Ticket cache with an injected clock
#[derive(Debug)]
pub struct TicketCache<T: TimeSource> {
    entries: HashMap<String, CachedTicket>,
    config: TicketCacheConfig,
    time_source: T,
    last_cleanup: Timestamp,
}

impl<T: TimeSource> TicketCache<T> {
    pub fn new(config: TicketCacheConfig, time_source: T) -> Self {
        let last_cleanup = time_source.now();
        Self {
            entries: HashMap::new(),
            config,
            time_source,
            last_cleanup,
        }
    }

    /// Store a ticket under a credentials key, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, ticket: impl Into<String>) {
        self.maybe_cleanup();
        let now = self.time_source.now();
        self.entries.insert(
            key.into(),
            CachedTicket {
                ticket: ticket.into(),
                issued_at: now,
                expires_at: now + self.config.ticket_ttl.as_millis() as u64,
            },
        );
    }

    /// Get a live ticket
    pub fn get(&mut self, key: &str) -> Option<&CachedTicket> {
        self.maybe_cleanup();
        let now = self.time_source.now();
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    pub fn remove(&mut self, key: &str) -> Option<CachedTicket> {
        self.entries.remove(key)
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired ticket now, returning how many were dropped
    pub fn purge_expired(&mut self) -> usize {
        let now = self.time_source.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.last_cleanup = now;
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Purged {} expired tickets", removed);
        }
        removed
    }

    fn maybe_cleanup(&mut self) {
        let now = self.time_source.now();
        if now - self.last_cleanup >= self.config.cleanup_interval.as_millis() as u64 {
            self.purge_expired();
        }
    }
}
