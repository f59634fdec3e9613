//! MSNP Core Protocol Implementation
//!
//! This crate provides the synchronous protocol model for an MSNP instant
//! messaging client: identity types, the envelope model, wire commands and
//! stream framing, MIME content, chunked message handling, the switchboard
//! session phase machine, configuration and the ticket cache. The async
//! channel engine lives in `msnp-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod cache;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use cache::{credentials_key, CachedTicket, TicketCache};
pub use config::{
    ChannelConfig, MsnpConfig, MsnpConfigBuilder, RegistryConfig, SharedMsnpConfig,
    SharedRegistryConfig, SharedSwitchboardConfig, SwitchboardConfig, TicketCacheConfig,
};
pub use envelope::{Envelope, RawPayload};
pub use errors::{
    ChunkError, MsnpError, MsnpResult, RegistryError, Result, RoutingError, SessionError,
    TransportError, WireError,
};
pub use protocol::{
    classify, ChunkReassembler, Command, CommandPayload, EmoticonDefinition, FrameCodec, Inbound,
    MessageChunker, MessageContent, MimeHeaders, MimeMessage, OutboundPayload, PhaseTransition,
    ProtocolErrorCode, SessionPhase, SessionTrigger, StateTransitionError, TextFormat,
    TextMessage, MAX_CHUNK_PAYLOAD,
};
pub use types::{
    Account, ClientType, ConversationId, MessageId, Owner, PresenceStatus, SessionHash, SessionId,
    SharedTimeSource, SystemTimeSource, TimeSource, Timestamp, TransactionId,
};
