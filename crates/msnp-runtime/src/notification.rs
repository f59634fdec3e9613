//! Notification session
//!
//! Handles the switchboard-related traffic of the notification channel:
//! `XFR` transfers for locally started conversations, `RNG` invitations,
//! bridged messages to and from other networks, and server sign-off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use msnp_core::types::decode_display_name;
use msnp_core::{
    classify, Account, ClientType, Command, MessageContent, MsnpConfig, MsnpError, MsnpResult,
    OutboundPayload, Owner, ProtocolErrorCode, SessionHash, SessionId, TransactionId,
};

use crate::events::NotificationEvent;
use crate::processor::{ChannelHandler, ChannelKind, MessageProcessor};
use crate::registry::ConversationRegistry;
use crate::services::SwitchboardConnector;
use crate::switchboard::SwitchboardSession;
use crate::sync::lock;

/// `UUM` message types for bridged delivery
const BRIDGE_TEXT: u32 = 1;
const BRIDGE_TYPING: u32 = 2;
const BRIDGE_NUDGE: u32 = 3;

pub struct NotificationSession {
    owner: Owner,
    processor: Arc<MessageProcessor>,
    registry: Arc<ConversationRegistry>,
    connector: Arc<dyn SwitchboardConnector>,
    /// Sessions waiting for the `XFR` answer to their request
    pending_transfers: Mutex<HashMap<TransactionId, SwitchboardSession>>,
    events: broadcast::Sender<NotificationEvent>,
}

impl std::fmt::Debug for NotificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSession")
            .field("owner", &self.owner.account)
            .field("processor", &self.processor)
            .field("pending_transfers", &lock(&self.pending_transfers).len())
            .finish()
    }
}

impl NotificationSession {
    pub fn new(
        owner: Owner,
        config: &MsnpConfig,
        registry: Arc<ConversationRegistry>,
        connector: Arc<dyn SwitchboardConnector>,
    ) -> Arc<Self> {
        let processor = MessageProcessor::new(ChannelKind::Notification, config.channels.clone());
        let (events, _) = broadcast::channel(config.channels.event_buffer_size.max(1));
        let session = Arc::new(Self {
            owner,
            processor,
            registry,
            connector,
            pending_transfers: Mutex::new(HashMap::new()),
            events,
        });
        session.processor.register_handler(Arc::new(NotificationHandler {
            session: Arc::downgrade(&session),
        }));
        session
    }

    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn pending_transfer_count(&self) -> usize {
        lock(&self.pending_transfers).len()
    }

    /// Ask the server for a switchboard to carry `session`
    pub fn request_switchboard(&self, session: &SwitchboardSession) -> MsnpResult<()> {
        let mut pending = lock(&self.pending_transfers);
        // Held across send so the reply always finds the entry
        if let Some(transaction) = self.processor.send(Command::new("XFR").with_arg("SB"))? {
            debug!("Requested switchboard ({})", transaction);
            pending.insert(transaction, session.clone());
        }
        Ok(())
    }

    /// Deliver to a contact on a bridged network
    pub fn send_cross_network(
        &self,
        recipient: &Account,
        network: ClientType,
        payload: &OutboundPayload,
    ) -> MsnpResult<()> {
        let message_type = match payload {
            OutboundPayload::Text(_) => BRIDGE_TEXT,
            OutboundPayload::Typing => BRIDGE_TYPING,
            OutboundPayload::Nudge => BRIDGE_NUDGE,
            other => return Err(MsnpError::unsupported_payload(other.kind(), "bridge")),
        };
        let command = Command::new("UUM")
            .with_arg(recipient.as_str())
            .with_arg(network.code().to_string())
            .with_arg(message_type.to_string())
            .with_mime(payload.to_mime(&self.owner)?);
        self.processor.send(command)?;
        Ok(())
    }

    /// Keep-alive
    pub fn ping(&self) -> MsnpResult<()> {
        self.processor.send(Command::new("PNG"))?;
        Ok(())
    }

    /// Sign off and close the notification channel
    pub fn sign_out(&self) {
        self.processor.disconnect();
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    fn on_transfer(&self, command: &Command) -> MsnpResult<()> {
        // XFR <txn> SB <address> CKI <hash>
        if command.arg(0) != Some("SB") {
            trace!("Ignoring non-switchboard transfer: {}", command);
            return Ok(());
        }
        let Some(transaction) = command.transaction() else {
            return Ok(());
        };
        let Some(session) = lock(&self.pending_transfers).remove(&transaction) else {
            trace!("Transfer {} matches no request", transaction);
            return Ok(());
        };

        let address = command.require_arg(1)?.to_string();
        session.set_hash(SessionHash::new(command.require_arg(3)?));
        self.spawn_connect(session, address)
    }

    fn on_ring(&self, command: &Command) -> MsnpResult<()> {
        // RNG <sessionId> <address> CKI <hash> <inviter> <name>
        let session_id = command.require_arg(0)?;
        let session_id = session_id.parse::<u64>().map(SessionId::new).map_err(|_| {
            MsnpError::handler_error(format!("invalid switchboard session id '{}'", session_id))
        })?;
        let address = command.require_arg(1)?.to_string();
        let hash = SessionHash::new(command.require_arg(3)?);
        let inviter = Account::new(command.require_arg(4)?)?;
        let name = decode_display_name(command.arg(5).unwrap_or_default());
        info!("Invited to switchboard {} by {} ({})", session_id, inviter, name);

        let (_, session) = self.registry.accept_invitation(session_id, hash, inviter)?;
        self.spawn_connect(session, address)
    }

    fn on_bridged_message(&self, command: &Command) -> MsnpResult<()> {
        // UBM <account> <network> <type> <len>
        let sender = Account::new(command.require_arg(0)?)?;
        let network = command
            .arg(1)
            .and_then(|code| code.parse::<u32>().ok())
            .and_then(ClientType::from_code)
            .unwrap_or(ClientType::Yahoo);
        let Some(message) = command.mime() else {
            return Ok(());
        };

        match classify(message) {
            Some(MessageContent::Text(message)) => {
                let _ = self.events.send(NotificationEvent::CrossNetworkMessage {
                    sender,
                    network,
                    message,
                });
            }
            other => trace!("Ignoring bridged content from {}: {:?}", sender, other),
        }
        Ok(())
    }

    fn on_transfer_failed(&self, error: &ProtocolErrorCode) {
        let Some(transaction) = error.transaction else {
            return;
        };
        let session = lock(&self.pending_transfers).remove(&transaction);
        if let Some(session) = session {
            warn!("Switchboard request {} failed with {}", transaction, error.code);
            session.abandon();
            let _ = self
                .events
                .send(NotificationEvent::SwitchboardRequestFailed(*error));
        }
    }

    fn spawn_connect(&self, session: SwitchboardSession, address: String) -> MsnpResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MsnpError::handler_error(format!("no async runtime: {}", e)))?;
        let connector = Arc::clone(&self.connector);
        runtime.spawn(async move {
            debug!("Connecting switchboard session to {}", address);
            if let Err(e) = connector
                .connect(Arc::clone(session.processor()), &address)
                .await
            {
                warn!("Switchboard connection to {} failed: {}", address, e);
                session.abandon();
            }
        });
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Channel Handler
// ----------------------------------------------------------------------------

struct NotificationHandler {
    session: Weak<NotificationSession>,
}

impl ChannelHandler for NotificationHandler {
    fn name(&self) -> &str {
        "notification-session"
    }

    fn handle_command(&self, processor: &MessageProcessor, command: &Command) -> MsnpResult<()> {
        let Some(session) = self.session.upgrade() else {
            return Ok(());
        };
        match command.name() {
            "XFR" => session.on_transfer(command),
            "RNG" => session.on_ring(command),
            "UBM" => session.on_bridged_message(command),
            "OUT" => {
                let reason = command.arg(0).map(str::to_string);
                info!("Signed out by server ({:?})", reason);
                let _ = session.events.send(NotificationEvent::SignedOut { reason });
                processor.close();
                Ok(())
            }
            "QNG" => {
                trace!("Keep-alive answered: {:?}", command.arg(0));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_protocol_error(&self, _processor: &MessageProcessor, error: &ProtocolErrorCode) {
        if let Some(session) = self.session.upgrade() {
            session.on_transfer_failed(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::TcpSwitchboardConnector;
    use msnp_core::TextMessage;

    fn session() -> Arc<NotificationSession> {
        let owner = Owner::new(Account::new("me@example.com").unwrap(), "Me");
        let config = MsnpConfig::testing();
        let registry = ConversationRegistry::new(owner.clone(), config.clone().into_shared());
        NotificationSession::new(owner, &config, registry, Arc::new(TcpSwitchboardConnector))
    }

    #[test]
    fn test_cross_network_text() {
        let notification = session();
        let mut outbound = notification.processor().open_channel();
        notification
            .send_cross_network(
                &Account::new("pal@yahoo.com").unwrap(),
                ClientType::Yahoo,
                &OutboundPayload::Text(TextMessage::new("hey")),
            )
            .unwrap();

        let frame = outbound.try_recv().unwrap();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.starts_with("UUM 1 pal@yahoo.com 32 1 "));
        assert!(text.ends_with("hey"));
    }

    #[test]
    fn test_cross_network_rejects_wink() {
        let notification = session();
        let _outbound = notification.processor().open_channel();
        let result = notification.send_cross_network(
            &Account::new("pal@yahoo.com").unwrap(),
            ClientType::Yahoo,
            &OutboundPayload::Wink { data: "w".into() },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_server_sign_out_closes_channel() {
        let notification = session();
        let mut events = notification.subscribe();
        let _outbound = notification.processor().open_channel();
        notification.processor().on_bytes_received(b"OUT OTH\r\n");

        assert!(!notification.processor().is_connected());
        assert_eq!(
            events.try_recv().unwrap(),
            NotificationEvent::SignedOut {
                reason: Some("OTH".to_string())
            }
        );
    }

    #[test]
    fn test_failed_transfer_abandons_session() {
        let notification = session();
        let _outbound = notification.processor().open_channel();
        let (_, switchboard) = notification.registry().create_conversation().unwrap();
        notification.request_switchboard(&switchboard).unwrap();
        assert_eq!(notification.pending_transfer_count(), 1);

        notification.processor().on_bytes_received(b"913 1\r\n");
        assert_eq!(notification.pending_transfer_count(), 0);
        assert!(switchboard.is_closed());
        assert!(notification.registry().is_empty());
    }
}
