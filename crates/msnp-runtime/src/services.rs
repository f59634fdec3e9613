//! Collaborator interfaces
//!
//! The engine reaches the contact list, the offline message store, the
//! peer-to-peer layer and the network only through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use msnp_core::{
    Account, ClientType, ConversationId, MimeMessage, MsnpResult, PresenceStatus, TextMessage,
};

use crate::processor::MessageProcessor;
use crate::switchboard::SwitchboardSession;

// ----------------------------------------------------------------------------
// Contact Directory
// ----------------------------------------------------------------------------

/// What the engine needs to know about a contact to route to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub account: Account,
    pub network: ClientType,
    pub display_name: String,
    pub status: PresenceStatus,
}

impl ContactInfo {
    pub fn new(account: Account, network: ClientType, status: PresenceStatus) -> Self {
        let display_name = account.as_str().to_string();
        Self {
            account,
            network,
            display_name,
            status,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

/// Contact and identity lookup
pub trait ContactDirectory: Send + Sync {
    /// Exact lookup by account and network
    fn lookup(&self, account: &Account, network: ClientType) -> Option<ContactInfo>;

    /// Lookup by account on any network, native first
    fn find(&self, account: &Account) -> Option<ContactInfo>;
}

// ----------------------------------------------------------------------------
// Offline Messages
// ----------------------------------------------------------------------------

/// Store-and-forward delivery for offline contacts
#[async_trait]
pub trait OfflineMessageService: Send + Sync {
    async fn store_message(&self, recipient: &ContactInfo, message: &TextMessage) -> MsnpResult<()>;
}

// ----------------------------------------------------------------------------
// Peer-to-Peer
// ----------------------------------------------------------------------------

/// Receiver for the peer-to-peer sub-protocol carried over switchboards
pub trait PeerToPeerHandler: Send + Sync {
    /// A switchboard session has been established and may carry P2P data
    fn on_session_bound(&self, session: &SwitchboardSession);

    /// A `application/x-msnmsgrp2p` message arrived from `sender`
    fn on_p2p_message(&self, session: &SwitchboardSession, sender: &Account, message: &MimeMessage);
}

// ----------------------------------------------------------------------------
// Switchboard Transport
// ----------------------------------------------------------------------------

/// Opens the transport for a switchboard channel
#[async_trait]
pub trait SwitchboardConnector: Send + Sync {
    async fn connect(
        &self,
        processor: Arc<MessageProcessor>,
        address: &str,
    ) -> MsnpResult<JoinHandle<()>>;
}

/// Plain TCP switchboard transport
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSwitchboardConnector;

#[async_trait]
impl SwitchboardConnector for TcpSwitchboardConnector {
    async fn connect(
        &self,
        processor: Arc<MessageProcessor>,
        address: &str,
    ) -> MsnpResult<JoinHandle<()>> {
        processor.connect(address).await
    }
}

// ----------------------------------------------------------------------------
// Conversation Ids
// ----------------------------------------------------------------------------

/// Source of conversation ids; the registry checks for collisions
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> ConversationId;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> ConversationId {
        ConversationId::random()
    }
}
