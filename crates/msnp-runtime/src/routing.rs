//! Outbound message routing
//!
//! Route selection is a pure function of the recipient's network, presence
//! and the payload. Precedence: bridged networks go through the notification
//! channel, offline contacts through store-and-forward, everyone else through
//! a single-party switchboard conversation.

use std::sync::Arc;

use tracing::{debug, info};

use msnp_core::{
    Account, ClientType, ConversationId, MsnpError, MsnpResult, OutboundPayload, PresenceStatus,
    RoutingError,
};

use crate::notification::NotificationSession;
use crate::registry::ConversationRegistry;
use crate::services::{ContactDirectory, ContactInfo, OfflineMessageService};
use crate::switchboard::MembershipState;

const ROUTE_BRIDGE: &str = "bridge";
const ROUTE_OFFLINE: &str = "store-and-forward";

/// Which path a payload takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePlan {
    Bridge,
    StoreAndForward,
    Switchboard,
}

/// Where a payload was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    Bridge,
    StoreAndForward,
    Switchboard(ConversationId),
}

/// Pick the route for a payload, rejecting payloads the route cannot carry
pub fn select_route(
    network: ClientType,
    status: PresenceStatus,
    payload: &OutboundPayload,
) -> MsnpResult<RoutePlan> {
    if network.is_bridge() {
        return match payload {
            OutboundPayload::Text(_) | OutboundPayload::Typing | OutboundPayload::Nudge => {
                Ok(RoutePlan::Bridge)
            }
            other => Err(MsnpError::unsupported_payload(other.kind(), ROUTE_BRIDGE)),
        };
    }
    if status.is_offline() {
        return match payload {
            OutboundPayload::Text(_) => Ok(RoutePlan::StoreAndForward),
            other => Err(MsnpError::unsupported_payload(other.kind(), ROUTE_OFFLINE)),
        };
    }
    Ok(RoutePlan::Switchboard)
}

/// Delivers payloads to contacts over whichever route applies
pub struct MessageRouter {
    directory: Arc<dyn ContactDirectory>,
    registry: Arc<ConversationRegistry>,
    notification: Arc<NotificationSession>,
    offline: Arc<dyn OfflineMessageService>,
}

impl MessageRouter {
    pub fn new(
        directory: Arc<dyn ContactDirectory>,
        registry: Arc<ConversationRegistry>,
        notification: Arc<NotificationSession>,
        offline: Arc<dyn OfflineMessageService>,
    ) -> Self {
        Self {
            directory,
            registry,
            notification,
            offline,
        }
    }

    /// Send a payload to one contact.
    ///
    /// Unsupported payloads are rejected before anything is sent. Switchboard
    /// delivery reuses a live single-party conversation or starts one; it
    /// never falls back to a multi-party conversation.
    pub async fn send(
        &self,
        recipient: &Account,
        payload: OutboundPayload,
    ) -> MsnpResult<DeliveryRoute> {
        let contact = self
            .directory
            .find(recipient)
            .ok_or_else(|| RoutingError::RecipientNotFound {
                account: recipient.to_string(),
            })?;
        self.deliver(contact, payload).await
    }

    /// Send a payload to a contact on a known network, such as the sender of
    /// a bridged message.
    pub async fn send_on_network(
        &self,
        recipient: &Account,
        network: ClientType,
        payload: OutboundPayload,
    ) -> MsnpResult<DeliveryRoute> {
        let contact = self
            .directory
            .lookup(recipient, network)
            .ok_or_else(|| RoutingError::RecipientNotFound {
                account: recipient.to_string(),
            })?;
        self.deliver(contact, payload).await
    }

    async fn deliver(
        &self,
        contact: ContactInfo,
        payload: OutboundPayload,
    ) -> MsnpResult<DeliveryRoute> {
        let recipient = &contact.account;
        let plan = select_route(contact.network, contact.status, &payload)?;
        debug!("Routing {} to {} via {:?}", payload.kind(), recipient, plan);

        match plan {
            RoutePlan::Bridge => {
                self.notification
                    .send_cross_network(&contact.account, contact.network, &payload)?;
                Ok(DeliveryRoute::Bridge)
            }
            RoutePlan::StoreAndForward => {
                if let OutboundPayload::Text(message) = &payload {
                    self.offline.store_message(&contact, message).await?;
                }
                Ok(DeliveryRoute::StoreAndForward)
            }
            RoutePlan::Switchboard => {
                let id = self.send_via_switchboard(&contact.account, payload)?;
                Ok(DeliveryRoute::Switchboard(id))
            }
        }
    }

    fn send_via_switchboard(
        &self,
        recipient: &Account,
        payload: OutboundPayload,
    ) -> MsnpResult<ConversationId> {
        if let Some((id, session)) = self.registry.find_single_party(recipient) {
            match session.membership(recipient) {
                Some(MembershipState::Joined) | Some(MembershipState::Invited) => {}
                _ => session.invite(recipient)?,
            }
            session.send_message(payload)?;
            return Ok(id);
        }

        let (id, session) = self.registry.create_conversation()?;
        info!("Starting conversation {} with {}", id, recipient);
        session.invite(recipient)?;
        session.send_message(payload)?;
        self.notification.request_switchboard(&session)?;
        Ok(id)
    }
}
