//! MSNP Runtime Engine
//!
//! This crate drives the protocol model from `msnp-core` over live channels:
//! - `MessageProcessor`: transport, transaction numbering and handler dispatch
//! - `SwitchboardSession`: handshake, membership, chunking and content events
//! - `NotificationSession`: switchboard requests, invitations and bridged delivery
//! - `ConversationRegistry`: conversation ids, overflow coalescing and lifecycle events
//! - `MessageRouter`: bridge, store-and-forward or switchboard delivery

pub mod events;
pub mod notification;
pub mod processor;
pub mod registry;
pub mod routing;
pub mod services;
pub mod switchboard;
mod sync;

pub use events::{ConversationEvent, ConversationEventKind, Initiator, NotificationEvent};
pub use notification::NotificationSession;
pub use processor::{ChannelEvent, ChannelHandler, ChannelKind, MessageProcessor, TransactionCounter};
pub use registry::{ConversationRegistry, PartyKey};
pub use routing::{select_route, DeliveryRoute, MessageRouter, RoutePlan};
pub use services::{
    ContactDirectory, ContactInfo, IdGenerator, OfflineMessageService, PeerToPeerHandler,
    RandomIdGenerator, SwitchboardConnector, TcpSwitchboardConnector,
};
pub use switchboard::{
    MembershipState, SessionEvent, SessionKey, SessionListener, SessionOrigin, SwitchboardSession,
};

// Re-export core types for convenience
pub use msnp_core::{
    Account, ClientType, ConversationId, MsnpConfig, MsnpError, MsnpResult, OutboundPayload, Owner,
    PresenceStatus, SessionPhase, TextMessage,
};
