//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the
//! protocol core and the runtime into one consistent interface.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::MsnpError;
use crate::protocol::chunking::{DEFAULT_MAX_CHUNKS, DEFAULT_REASSEMBLY_EXPIRY, MAX_CHUNK_PAYLOAD};
use crate::protocol::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::Result;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for one physical channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Capacity of the channel event broadcast
    pub event_buffer_size: usize,
    /// Largest inbound frame (line plus payload) accepted
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 128,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            event_buffer_size: 32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ----------------------------------------------------------------------------
// Switchboard Configuration
// ----------------------------------------------------------------------------

/// Configuration for switchboard sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    /// Largest `MSG` body sent unchunked
    pub max_chunk_payload: usize,
    /// Most chunks accepted for one inbound message
    pub max_chunks: u32,
    /// Drop partial messages older than this; `None` keeps them until the session closes
    pub reassembly_expiry: Option<Duration>,
    /// How long `wait_established` waits by default
    pub handshake_timeout: Duration,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            max_chunk_payload: MAX_CHUNK_PAYLOAD,
            max_chunks: DEFAULT_MAX_CHUNKS,
            reassembly_expiry: Some(DEFAULT_REASSEMBLY_EXPIRY),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl SwitchboardConfig {
    /// Behave exactly like the reference client: partial messages never expire
    pub fn wire_compatible() -> Self {
        Self {
            reassembly_expiry: None,
            ..Self::default()
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            reassembly_expiry: Some(Duration::from_secs(5)),
            handshake_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Registry Configuration
// ----------------------------------------------------------------------------

/// Configuration for the conversation registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Attempts to draw an unused conversation id before giving up
    pub max_id_attempts: u32,
    /// Capacity of the conversation event broadcast
    pub event_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_id_attempts: 16,
            event_buffer_size: 256,
        }
    }
}

impl RegistryConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            max_id_attempts: 4,
            event_buffer_size: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Ticket Cache Configuration
// ----------------------------------------------------------------------------

/// Configuration for the authentication ticket cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketCacheConfig {
    /// Lifetime of a cached ticket
    pub ticket_ttl: Duration,
    /// Minimum time between purges of expired tickets
    pub cleanup_interval: Duration,
}

impl Default for TicketCacheConfig {
    fn default() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl TicketCacheConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            ticket_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Master configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MsnpConfig {
    /// Channel transport configuration
    pub channels: ChannelConfig,
    /// Switchboard session configuration
    pub switchboard: SwitchboardConfig,
    /// Conversation registry configuration
    pub registry: RegistryConfig,
    /// Ticket cache configuration
    pub tickets: TicketCacheConfig,
}

impl MsnpConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for MsnpConfig
    pub fn builder() -> MsnpConfigBuilder {
        MsnpConfigBuilder::new()
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            switchboard: SwitchboardConfig::testing(),
            registry: RegistryConfig::testing(),
            tickets: TicketCacheConfig::testing(),
        }
    }

    /// Reproduce the reference client's on-wire and buffering behavior
    pub fn wire_compatible() -> Self {
        Self {
            switchboard: SwitchboardConfig::wire_compatible(),
            ..Self::default()
        }
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> core::result::Result<(), String> {
        // Channels
        if self.channels.event_buffer_size == 0 {
            return Err("Channel event buffer size cannot be zero".into());
        }
        if self.channels.max_frame_size < 64 {
            return Err("Maximum frame size must be at least 64 bytes".into());
        }

        // Switchboard
        if self.switchboard.max_chunk_payload == 0 {
            return Err("Maximum chunk payload cannot be zero".into());
        }
        if self.switchboard.max_chunk_payload >= self.channels.max_frame_size {
            return Err("Maximum chunk payload must fit inside one frame".into());
        }
        if self.switchboard.max_chunks < 2 {
            return Err("Maximum chunks must allow at least two chunks".into());
        }
        if self.switchboard.reassembly_expiry == Some(Duration::ZERO) {
            return Err("Reassembly expiry cannot be zero; use None to disable".into());
        }

        // Registry
        if self.registry.max_id_attempts == 0 {
            return Err("Conversation id attempts cannot be zero".into());
        }
        if self.registry.event_buffer_size == 0 {
            return Err("Registry event buffer size cannot be zero".into());
        }

        // Tickets
        if self.tickets.ticket_ttl.is_zero() {
            return Err("Ticket TTL cannot be zero".into());
        }
        if self.tickets.cleanup_interval > self.tickets.ticket_ttl {
            return Err("Ticket cleanup interval should not exceed the ticket TTL".into());
        }

        Ok(())
    }

    /// Convert to shared configuration
    pub fn into_shared(self) -> SharedMsnpConfig {
        Arc::new(self)
    }
}

// ----------------------------------------------------------------------------
// Shared Configuration Types
// ----------------------------------------------------------------------------

pub type SharedMsnpConfig = Arc<MsnpConfig>;

pub type SharedSwitchboardConfig = Arc<SwitchboardConfig>;

pub type SharedRegistryConfig = Arc<RegistryConfig>;

// ----------------------------------------------------------------------------
// Configuration Builder Pattern
// ----------------------------------------------------------------------------

/// Builder for MsnpConfig
#[derive(Debug, Clone, Default)]
pub struct MsnpConfigBuilder {
    channels: Option<ChannelConfig>,
    switchboard: Option<SwitchboardConfig>,
    registry: Option<RegistryConfig>,
    tickets: Option<TicketCacheConfig>,
}

impl MsnpConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set channel configuration
    pub fn channels(mut self, config: ChannelConfig) -> Self {
        self.channels = Some(config);
        self
    }

    /// Set switchboard configuration
    pub fn switchboard(mut self, config: SwitchboardConfig) -> Self {
        self.switchboard = Some(config);
        self
    }

    /// Set registry configuration
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = Some(config);
        self
    }

    /// Set ticket cache configuration
    pub fn tickets(mut self, config: TicketCacheConfig) -> Self {
        self.tickets = Some(config);
        self
    }

    /// Use testing preset as base (can be further customized)
    pub fn testing(self) -> Self {
        Self {
            channels: Some(ChannelConfig::testing()),
            switchboard: Some(SwitchboardConfig::testing()),
            registry: Some(RegistryConfig::testing()),
            tickets: Some(TicketCacheConfig::testing()),
        }
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<MsnpConfig> {
        let config = self.build_unchecked();
        config.validate().map_err(MsnpError::config_error)?;
        Ok(config)
    }

    /// Build the configuration without validation
    pub fn build_unchecked(self) -> MsnpConfig {
        MsnpConfig {
            channels: self.channels.unwrap_or_default(),
            switchboard: self.switchboard.unwrap_or_default(),
            registry: self.registry.unwrap_or_default(),
            tickets: self.tickets.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        assert!(MsnpConfig::default().validate().is_ok());
        assert!(MsnpConfig::testing().validate().is_ok());
        assert!(MsnpConfig::wire_compatible().validate().is_ok());
    }

    #[test]
    fn test_wire_compatible_disables_expiry() {
        let config = MsnpConfig::wire_compatible();
        assert_eq!(config.switchboard.reassembly_expiry, None);
        assert_eq!(config.switchboard.max_chunk_payload, 1400);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let result = MsnpConfig::builder()
            .registry(RegistryConfig {
                max_id_attempts: 0,
                event_buffer_size: 8,
            })
            .build();
        assert!(matches!(result, Err(MsnpError::Configuration { .. })));
    }

    #[test]
    fn test_builder_testing_preset() {
        let config = MsnpConfig::builder()
            .testing()
            .switchboard(SwitchboardConfig::wire_compatible())
            .build()
            .unwrap();
        assert_eq!(config.registry.max_id_attempts, 4);
        assert!(config.switchboard.reassembly_expiry.is_none());
    }
}
