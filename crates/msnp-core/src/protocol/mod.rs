//! MSNP Protocol Module
//!
//! This module contains the wire-level protocol implementation:
//! - `wire`: Command lines, payload layout and numeric error replies
//! - `codec`: Stream framing for tokio-util
//! - `mime`: MIME-style headers and bodies carried by `MSG`
//! - `content`: Typed content classification and outbound payloads
//! - `chunking`: Multi-chunk message splitting and reassembly
//! - `session_state`: Switchboard session phase machine

pub mod chunking;
pub mod codec;
pub mod content;
pub mod mime;
pub mod session_state;
pub mod wire;

// Re-export wire types
pub use wire::{Command, CommandPayload, Inbound, PayloadKind, ProtocolErrorCode};

// Re-export codec types
pub use codec::FrameCodec;

// Re-export MIME types
pub use mime::{MimeHeaders, MimeMessage};

// Re-export content types
pub use content::{
    classify, is_p2p, EmoticonDefinition, MessageContent, OutboundPayload, TextFormat, TextMessage,
};

// Re-export chunking types
pub use chunking::{ChunkReassembler, MessageChunker, MAX_CHUNK_PAYLOAD};

// Re-export session state types
pub use session_state::{PhaseTransition, SessionPhase, SessionTrigger, StateTransitionError};
