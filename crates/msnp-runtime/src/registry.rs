//! Conversation registry
//!
//! Maps conversation ids onto live switchboard sessions. Two sessions with the
//! same remote party and the same multiplicity are one conversation: the
//! session registered first is canonical and the other is kept as overflow,
//! with its events published under the canonical id.
//!
//! All lookups, insertions and overflow resolution run under one mutex.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use msnp_core::{
    Account, ConversationId, MessageContent, MsnpResult, Owner, RegistryError, SessionHash,
    SessionId, SharedMsnpConfig, SharedTimeSource, SystemTimeSource,
};

use crate::events::{ConversationEvent, ConversationEventKind, Initiator};
use crate::services::{IdGenerator, PeerToPeerHandler, RandomIdGenerator};
use crate::switchboard::{SessionEvent, SessionKey, SessionListener, SwitchboardSession};
use crate::sync::{lock, read, write};

// ----------------------------------------------------------------------------
// Party Keys
// ----------------------------------------------------------------------------

/// Remote party and multiplicity of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartyKey {
    Single(Account),
    Multi(BTreeSet<Account>),
}

impl PartyKey {
    pub fn from_participants(participants: BTreeSet<Account>) -> Option<Self> {
        match participants.len() {
            0 => None,
            1 => participants.into_iter().next().map(PartyKey::Single),
            _ => Some(PartyKey::Multi(participants)),
        }
    }

    pub fn of(session: &SwitchboardSession) -> Option<Self> {
        Self::from_participants(session.participants())
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, PartyKey::Multi(_))
    }
}

// ----------------------------------------------------------------------------
// Registry State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ConversationEntry {
    session: SwitchboardSession,
    overflow: Vec<SwitchboardSession>,
    initiator: Initiator,
    /// Registration order; the lower one wins when two entries coalesce
    sequence: u64,
    established: bool,
}

impl ConversationEntry {
    fn sessions(&self) -> impl Iterator<Item = &SwitchboardSession> {
        std::iter::once(&self.session).chain(self.overflow.iter())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    conversations: HashMap<ConversationId, ConversationEntry>,
    by_session: HashMap<SessionKey, ConversationId>,
    /// Absorbed conversation id -> live canonical id
    aliases: HashMap<ConversationId, ConversationId>,
    /// Merges not yet announced, as (absorbed, canonical)
    coalesced: Vec<(ConversationId, ConversationId)>,
    next_sequence: u64,
}

impl RegistryState {
    /// Follow an absorbed id to the conversation that took it over
    fn resolve(&self, id: ConversationId) -> ConversationId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    fn entry(&self, id: ConversationId) -> Option<&ConversationEntry> {
        self.conversations.get(&self.resolve(id))
    }

    fn is_taken(&self, id: &ConversationId) -> bool {
        self.conversations.contains_key(id) || self.aliases.contains_key(id)
    }

    /// Drop the entry and every alias that points at it
    fn remove(&mut self, id: ConversationId) -> Option<ConversationEntry> {
        self.aliases.retain(|_, target| *target != id);
        self.conversations.remove(&id)
    }

    /// Live entry with this party key, oldest first, excluding `except`
    fn find_party(&self, key: &PartyKey, except: Option<ConversationId>) -> Option<ConversationId> {
        self.conversations
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .filter(|(_, entry)| !entry.session.is_closed())
            .filter(|(_, entry)| PartyKey::of(&entry.session).as_ref() == Some(key))
            .min_by_key(|(_, entry)| entry.sequence)
            .map(|(id, _)| *id)
    }

    /// Fold `from` into `into`, remapping its sessions
    fn merge(&mut self, from: ConversationId, into: ConversationId) {
        let Some(absorbed) = self.conversations.remove(&from) else {
            return;
        };
        let sessions: Vec<SwitchboardSession> = absorbed.sessions().cloned().collect();
        for session in &sessions {
            self.by_session.insert(session.key(), into);
        }
        if let Some(canonical) = self.conversations.get_mut(&into) {
            canonical.overflow.extend(sessions);
            canonical.established |= absorbed.established;
        }
        for target in self.aliases.values_mut() {
            if *target == from {
                *target = into;
            }
        }
        self.aliases.insert(from, into);
        self.coalesced.push((from, into));
        info!("Conversation {} coalesced into {}", from, into);
    }

    /// Run overflow resolution for the entry owning `key`, returning its id afterwards
    fn coalesce(&mut self, key: SessionKey) -> Option<ConversationId> {
        let id = *self.by_session.get(&key)?;
        let entry = self.conversations.get(&id)?;
        if entry.session.key() != key {
            return Some(id);
        }
        let Some(party) = PartyKey::of(&entry.session) else {
            return Some(id);
        };
        let Some(other) = self.find_party(&party, Some(id)) else {
            return Some(id);
        };

        let ours = entry.sequence;
        let theirs = self.conversations.get(&other).map(|entry| entry.sequence)?;
        if theirs < ours {
            self.merge(id, other);
            Some(other)
        } else {
            self.merge(other, id);
            Some(id)
        }
    }
}

// ----------------------------------------------------------------------------
// Conversation Registry
// ----------------------------------------------------------------------------

pub struct ConversationRegistry {
    owner: Owner,
    config: SharedMsnpConfig,
    time_source: SharedTimeSource,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<RegistryState>,
    events: broadcast::Sender<ConversationEvent>,
    p2p: RwLock<Option<Arc<dyn PeerToPeerHandler>>>,
    this: Weak<ConversationRegistry>,
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("owner", &self.owner.account)
            .field("conversations", &self.len())
            .finish()
    }
}

impl ConversationRegistry {
    pub fn new(owner: Owner, config: SharedMsnpConfig) -> Arc<Self> {
        Self::with_services(
            owner,
            config,
            Arc::new(SystemTimeSource::new()),
            Arc::new(RandomIdGenerator),
        )
    }

    pub fn with_services(
        owner: Owner,
        config: SharedMsnpConfig,
        time_source: SharedTimeSource,
        ids: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.registry.event_buffer_size.max(1));
        Arc::new_cyclic(|this| Self {
            owner,
            config,
            time_source,
            ids,
            state: Mutex::new(RegistryState::default()),
            events,
            p2p: RwLock::new(None),
            this: this.clone(),
        })
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Handler attached to every session registered from now on
    pub fn set_p2p_handler(&self, handler: Arc<dyn PeerToPeerHandler>) {
        *write(&self.p2p) = Some(handler);
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Start a conversation with a fresh locally initiated session
    pub fn create_conversation(&self) -> MsnpResult<(ConversationId, SwitchboardSession)> {
        let session =
            SwitchboardSession::local(self.owner.clone(), &self.config, self.time_source.clone());
        let id = self.register(session.clone(), Initiator::LocalUser)?;
        Ok((id, session))
    }

    /// Register a session that a remote party or another subsystem created.
    ///
    /// Sessions started by our own account elsewhere or by the peer-to-peer
    /// layer are registered without a `Created` event.
    pub fn on_session_created_remotely(
        &self,
        session: SwitchboardSession,
        initiator: Initiator,
    ) -> MsnpResult<ConversationId> {
        self.register(session, initiator)
    }

    /// Build and register a session answering a `RNG` invitation
    pub fn accept_invitation(
        &self,
        session_id: SessionId,
        hash: SessionHash,
        inviter: Account,
    ) -> MsnpResult<(ConversationId, SwitchboardSession)> {
        let initiator = if self.owner.is_owner(&inviter) {
            Initiator::Owner
        } else {
            Initiator::Remote(inviter.clone())
        };
        let session = SwitchboardSession::invited(
            self.owner.clone(),
            session_id,
            hash,
            inviter,
            &self.config,
            self.time_source.clone(),
        );
        let id = self.register(session.clone(), initiator)?;
        Ok((id, session))
    }

    fn register(&self, session: SwitchboardSession, initiator: Initiator) -> MsnpResult<ConversationId> {
        session.add_listener(Arc::new(RegistryListener {
            registry: self.this.clone(),
        }));
        if let Some(handler) = read(&self.p2p).clone() {
            session.set_p2p_handler(handler);
        }

        let (id, announce) = {
            let mut state = lock(&self.state);
            let existing = PartyKey::of(&session)
                .and_then(|party| state.find_party(&party, None));

            match existing {
                Some(id) => {
                    state.by_session.insert(session.key(), id);
                    if let Some(entry) = state.conversations.get_mut(&id) {
                        entry.overflow.push(session.clone());
                    }
                    info!(
                        "Session {} registered as overflow of conversation {}",
                        session.key().value(),
                        id
                    );
                    (id, false)
                }
                None => {
                    let id = self.allocate_id(&state)?;
                    let sequence = state.next_sequence;
                    state.next_sequence += 1;
                    state.by_session.insert(session.key(), id);
                    state.conversations.insert(
                        id,
                        ConversationEntry {
                            session: session.clone(),
                            overflow: Vec::new(),
                            initiator: initiator.clone(),
                            sequence,
                            established: false,
                        },
                    );
                    debug!("Conversation {} registered ({:?})", id, initiator);
                    (id, !initiator.is_internal())
                }
            }
        };

        if announce {
            self.publish(id, ConversationEventKind::Created { initiator });
        }
        Ok(id)
    }

    fn allocate_id(&self, state: &RegistryState) -> MsnpResult<ConversationId> {
        let attempts = self.config.registry.max_id_attempts;
        for _ in 0..attempts {
            let id = self.ids.next_id();
            if !state.is_taken(&id) {
                return Ok(id);
            }
            trace!("Conversation id {} already in use", id);
        }
        warn!("Conversation id allocation failed after {} attempts", attempts);
        Err(RegistryError::IdExhausted { attempts }.into())
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Canonical session of a conversation, following coalesced ids
    pub fn session(&self, id: ConversationId) -> Option<SwitchboardSession> {
        lock(&self.state)
            .entry(id)
            .map(|entry| entry.session.clone())
    }

    /// Live id a conversation id is published under now
    pub fn canonical_id(&self, id: ConversationId) -> Option<ConversationId> {
        let state = lock(&self.state);
        let resolved = state.resolve(id);
        state.conversations.contains_key(&resolved).then_some(resolved)
    }

    /// Conversation a session's events are published under
    pub fn conversation_of(&self, session: &SwitchboardSession) -> Option<ConversationId> {
        lock(&self.state).by_session.get(&session.key()).copied()
    }

    pub fn initiator(&self, id: ConversationId) -> Option<Initiator> {
        lock(&self.state)
            .entry(id)
            .map(|entry| entry.initiator.clone())
    }

    /// Number of sessions held as overflow of a conversation
    pub fn overflow_count(&self, id: ConversationId) -> usize {
        lock(&self.state)
            .entry(id)
            .map_or(0, |entry| entry.overflow.len())
    }

    /// Live single-party conversation with `account`; multi-party ones never match
    pub fn find_single_party(&self, account: &Account) -> Option<(ConversationId, SwitchboardSession)> {
        let state = lock(&self.state);
        let id = state.find_party(&PartyKey::Single(account.clone()), None)?;
        state
            .conversations
            .get(&id)
            .map(|entry| (id, entry.session.clone()))
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        lock(&self.state).conversations.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Leave one conversation, closing every session it owns
    pub fn leave(&self, id: ConversationId) -> MsnpResult<()> {
        let sessions: Vec<SwitchboardSession> = {
            let state = lock(&self.state);
            let entry = state
                .entry(id)
                .ok_or_else(|| RegistryError::ConversationNotFound {
                    conversation_id: id.to_string(),
                })?;
            entry.sessions().cloned().collect()
        };
        // Release callbacks take the registry lock
        for session in sessions {
            session.leave();
        }
        Ok(())
    }

    /// Leave every conversation
    pub fn close_all(&self) {
        let sessions: Vec<SwitchboardSession> = lock(&self.state)
            .conversations
            .values()
            .flat_map(|entry| entry.sessions().cloned().collect::<Vec<_>>())
            .collect();
        info!("Closing {} switchboard sessions", sessions.len());
        for session in sessions {
            session.leave();
        }
    }

    // ------------------------------------------------------------------------
    // Session Callbacks
    // ------------------------------------------------------------------------

    fn on_session_event(&self, session: &SwitchboardSession, event: &SessionEvent) {
        let (id, coalesced) = {
            let mut state = lock(&self.state);
            let id = if event.changes_membership() {
                state.coalesce(session.key())
            } else {
                state.by_session.get(&session.key()).copied()
            };
            let Some(id) = id else {
                trace!("Event from unregistered session {}", session.key().value());
                return;
            };
            if *event == SessionEvent::Established {
                if let Some(entry) = state.conversations.get_mut(&id) {
                    entry.established = true;
                }
            }
            (id, std::mem::take(&mut state.coalesced))
        };

        for (from, into) in coalesced {
            self.publish(from, ConversationEventKind::Coalesced { into });
        }
        for kind in conversation_events(event) {
            self.publish(id, kind);
        }
    }

    fn on_session_released(&self, session: &SwitchboardSession) {
        let ended = {
            let mut state = lock(&self.state);
            let Some(id) = state.by_session.remove(&session.key()) else {
                return;
            };
            let Some(entry) = state.conversations.get_mut(&id) else {
                return;
            };

            if entry.session.key() != session.key() {
                entry.overflow.retain(|overflow| overflow.key() != session.key());
                debug!("Overflow session of conversation {} released", id);
                None
            } else if let Some(position) =
                entry.overflow.iter().position(|overflow| !overflow.is_closed())
            {
                entry.session = entry.overflow.remove(position);
                info!(
                    "Conversation {} rebound to session {}",
                    id,
                    entry.session.key().value()
                );
                None
            } else {
                let entry = state.remove(id);
                match entry {
                    Some(entry) if entry.established => Some(id),
                    _ => {
                        debug!("Conversation {} closed before it was established", id);
                        None
                    }
                }
            }
        };

        if let Some(id) = ended {
            info!("Conversation {} ended", id);
            self.publish(id, ConversationEventKind::Ended);
        }
    }

    fn publish(&self, conversation_id: ConversationId, kind: ConversationEventKind) {
        trace!("Conversation {} event: {}", conversation_id, kind.name());
        // No subscribers is fine
        let _ = self.events.send(ConversationEvent {
            conversation_id,
            kind,
        });
    }
}

/// Session events as the application sees them
fn conversation_events(event: &SessionEvent) -> Vec<ConversationEventKind> {
    match event {
        SessionEvent::Established | SessionEvent::Closed => Vec::new(),
        SessionEvent::ContactJoined {
            account,
            display_name,
        } => vec![ConversationEventKind::ContactJoined {
            account: account.clone(),
            display_name: display_name.clone(),
        }],
        SessionEvent::ContactLeft { account } => vec![ConversationEventKind::ContactLeft {
            account: account.clone(),
        }],
        SessionEvent::AllContactsLeft => vec![ConversationEventKind::AllContactsLeft],
        SessionEvent::InvitationFailed { account, code } => {
            vec![ConversationEventKind::InvitationFailed {
                account: account.clone(),
                code: *code,
            }]
        }
        SessionEvent::DeliveryFailed { transaction } => {
            vec![ConversationEventKind::DeliveryFailed {
                transaction: *transaction,
            }]
        }
        SessionEvent::Message { sender, content } => {
            let sender = sender.clone();
            match content {
                MessageContent::Text(message) => vec![ConversationEventKind::TextMessage {
                    sender,
                    message: message.clone(),
                }],
                MessageContent::Typing { account } => vec![ConversationEventKind::Typing {
                    sender: account.clone(),
                }],
                MessageContent::Nudge => vec![ConversationEventKind::Nudge { sender }],
                MessageContent::Wink { data } => vec![ConversationEventKind::Wink {
                    sender,
                    data: data.clone(),
                }],
                MessageContent::Emoticons(definitions) => definitions
                    .iter()
                    .map(|definition| ConversationEventKind::EmoticonDefinition {
                        sender: sender.clone(),
                        definition: definition.clone(),
                    })
                    .collect(),
            }
        }
    }
}

/// Session listener that reports back to the registry
struct RegistryListener {
    registry: Weak<ConversationRegistry>,
}

impl SessionListener for RegistryListener {
    fn on_session_event(&self, session: &SwitchboardSession, event: &SessionEvent) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_session_event(session, event);
        }
    }

    fn on_session_released(&self, session: &SwitchboardSession) {
        if let Some(registry) = self.registry.upgrade() {
            registry.on_session_released(session);
        }
    }
}
