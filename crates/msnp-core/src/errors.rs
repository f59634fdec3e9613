//! Error types for the MSNP protocol engine
//!
//! This module contains all error types used throughout the core and runtime,
//! including wire parsing errors, chunk reassembly errors, session errors,
//! transport errors, and the main `MsnpError` type that unifies them all.

use crate::protocol::session_state::StateTransitionError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while parsing or encoding wire frames
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Empty command line")]
    EmptyLine,
    #[error("Command line is not terminated")]
    MissingTerminator,
    #[error("Command line is not valid UTF-8")]
    InvalidUtf8,
    #[error("Invalid transaction id '{value}' in {command}")]
    InvalidTransaction { command: String, value: String },
    #[error("Missing argument {index} in {command}")]
    MissingArgument { command: String, index: usize },
    #[error("Invalid payload length '{value}' in {command}")]
    InvalidPayloadLength { command: String, value: String },
    #[error("Payload length mismatch: declared {declared}, got {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
    #[error("Frame too large: {size} bytes (max: {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },
    #[error("Malformed MIME header line: {line}")]
    MalformedHeader { line: String },
    #[error("Invalid error code '{value}'")]
    InvalidErrorCode { value: String },
    #[error("Expected a named command, got error code {code}")]
    UnexpectedErrorCode { code: u16 },
    #[error("Invalid account '{value}'")]
    InvalidAccount { value: String },
}

/// Errors raised by multi-chunk message reassembly
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("Chunk {index} of message {message_id} arrived without its first chunk")]
    MissingFirstChunk { message_id: String, index: u32 },
    #[error("Chunk out of order for message {message_id}: expected {expected}, got {actual}")]
    OutOfOrder {
        message_id: String,
        expected: u32,
        actual: u32,
    },
    #[error("Invalid chunk header {header}: '{value}'")]
    InvalidHeader { header: &'static str, value: String },
    #[error("Too many chunks: {count} (max: {max})")]
    TooManyChunks { count: u32, max: u32 },
}

/// Errors raised by switchboard session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Switchboard session has no session hash yet")]
    MissingHash,
    #[error("Switchboard session is closed")]
    Closed,
    #[error("Cannot invite the owner account {account}")]
    SelfInvitation { account: String },
    #[error("Handshake timed out after {duration_ms}ms")]
    HandshakeTimeout { duration_ms: u64 },
}

/// Errors raised by channel transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
    #[error("{channel} channel is not connected")]
    NotConnected { channel: &'static str },
    #[error("{channel} channel writer has shut down")]
    ChannelClosed { channel: &'static str },
}

/// Errors raised by the conversation registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Conversation id allocation failed after {attempts} attempts")]
    IdExhausted { attempts: u32 },
    #[error("Conversation {conversation_id} not found")]
    ConversationNotFound { conversation_id: String },
}

/// Errors raised by outbound routing decisions
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("{payload} payloads cannot be delivered via {route}")]
    UnsupportedPayload {
        payload: &'static str,
        route: &'static str,
    },
    #[error("Recipient {account} is not in the contact directory")]
    RecipientNotFound { account: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the MSNP engine
#[derive(Debug, thiserror::Error)]
pub enum MsnpError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// A channel handler failed while processing a command
    #[error("Handler error: {reason}")]
    Handler { reason: String },
}

impl From<std::io::Error> for MsnpError {
    fn from(err: std::io::Error) -> Self {
        MsnpError::Transport(TransportError::NetworkIo(err))
    }
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MsnpError {
    /// Create a missing argument error
    pub fn missing_argument<C: Into<String>>(command: C, index: usize) -> Self {
        MsnpError::Wire(WireError::MissingArgument {
            command: command.into(),
            index,
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MsnpError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a handler error with a reason
    pub fn handler_error<T: Into<String>>(reason: T) -> Self {
        MsnpError::Handler {
            reason: reason.into(),
        }
    }

    /// Create a not connected error for a channel
    pub fn not_connected(channel: &'static str) -> Self {
        MsnpError::Transport(TransportError::NotConnected { channel })
    }

    /// Create an unsupported payload error for a route
    pub fn unsupported_payload(payload: &'static str, route: &'static str) -> Self {
        MsnpError::Routing(RoutingError::UnsupportedPayload { payload, route })
    }

    /// Whether this error was raised by an out-of-sequence chunk stream
    pub fn is_chunk_error(&self) -> bool {
        matches!(self, MsnpError::Chunk(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MsnpError>;
pub type MsnpResult<T> = Result<T>;
