//! Events surfaced to the application
//!
//! Conversation events are always tagged with the canonical conversation id;
//! events from an overflow session are re-tagged before they are published.

use msnp_core::{
    Account, ClientType, ConversationId, EmoticonDefinition, ProtocolErrorCode, TextMessage,
    TransactionId,
};

// ----------------------------------------------------------------------------
// Conversation Events
// ----------------------------------------------------------------------------

/// Who started a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiator {
    /// The application called `create_conversation`
    LocalUser,
    /// A contact invited us
    Remote(Account),
    /// Another client signed in with our own account invited us
    Owner,
    /// Our own peer-to-peer layer opened the session
    PeerToPeer,
}

impl Initiator {
    /// Internally generated sessions that should not surface as new conversations
    pub fn is_internal(&self) -> bool {
        matches!(self, Initiator::Owner | Initiator::PeerToPeer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    pub conversation_id: ConversationId,
    pub kind: ConversationEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEventKind {
    // Lifecycle
    Created {
        initiator: Initiator,
    },
    ContactJoined {
        account: Account,
        display_name: String,
    },
    ContactLeft {
        account: Account,
    },
    AllContactsLeft,
    Ended,
    /// This conversation was folded into an older one with the same party;
    /// the id now resolves to `into`
    Coalesced {
        into: ConversationId,
    },

    // Messages
    TextMessage {
        sender: Account,
        message: TextMessage,
    },
    Typing {
        sender: Account,
    },
    Nudge {
        sender: Account,
    },
    /// One event per definition carried by an emoticon message
    EmoticonDefinition {
        sender: Account,
        definition: EmoticonDefinition,
    },
    Wink {
        sender: Account,
        data: String,
    },

    // Failures
    InvitationFailed {
        account: Account,
        code: u16,
    },
    DeliveryFailed {
        transaction: TransactionId,
    },
}

impl ConversationEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConversationEventKind::Created { .. } => "created",
            ConversationEventKind::ContactJoined { .. } => "contact-joined",
            ConversationEventKind::ContactLeft { .. } => "contact-left",
            ConversationEventKind::AllContactsLeft => "all-contacts-left",
            ConversationEventKind::Ended => "ended",
            ConversationEventKind::Coalesced { .. } => "coalesced",
            ConversationEventKind::TextMessage { .. } => "text",
            ConversationEventKind::Typing { .. } => "typing",
            ConversationEventKind::Nudge { .. } => "nudge",
            ConversationEventKind::EmoticonDefinition { .. } => "emoticon",
            ConversationEventKind::Wink { .. } => "wink",
            ConversationEventKind::InvitationFailed { .. } => "invitation-failed",
            ConversationEventKind::DeliveryFailed { .. } => "delivery-failed",
        }
    }
}

// ----------------------------------------------------------------------------
// Notification Events
// ----------------------------------------------------------------------------

/// Events from the notification channel that are not tied to a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A message from a contact on a bridged network
    CrossNetworkMessage {
        sender: Account,
        network: ClientType,
        message: TextMessage,
    },
    /// A switchboard request was answered with an error
    SwitchboardRequestFailed(ProtocolErrorCode),
    /// The server signed us off
    SignedOut { reason: Option<String> },
}
