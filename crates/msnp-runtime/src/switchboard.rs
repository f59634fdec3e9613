//! Switchboard session
//!
//! One session per conversation channel. The session drives the `USR`/`ANS`
//! handshake, keeps invitations and outbound messages queued until the channel
//! can carry them, tracks membership and turns inbound `MSG` payloads into
//! typed events after chunk reassembly.
//!
//! Session events are delivered to [`SessionListener`]s outside the session
//! lock, so listeners may call back into the session.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use msnp_core::protocol::content::is_p2p;
use msnp_core::types::decode_display_name;
use msnp_core::{
    classify, Account, ChunkReassembler, Command, MessageChunker, MessageContent, MimeMessage,
    MsnpConfig, MsnpResult, OutboundPayload, Owner, ProtocolErrorCode, SessionError,
    SessionHash, SessionId, SessionPhase, SessionTrigger, SharedTimeSource, SwitchboardConfig,
    TransactionId,
};

use crate::processor::{ChannelHandler, ChannelKind, MessageProcessor};
use crate::services::PeerToPeerHandler;
use crate::sync::{lock, panic_message, read, write};

// ----------------------------------------------------------------------------
// Session Identity
// ----------------------------------------------------------------------------

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle identity, independent of the server-issued hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    fn next() -> Self {
        SessionKey(NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// How the session came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Started locally; authenticates with `USR`
    Local,
    /// Answering a `RNG` invitation; authenticates with `ANS`
    Invited {
        session_id: SessionId,
        inviter: Account,
    },
}

/// Membership of one remote account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipState {
    Invited,
    Joined,
    Left,
}

// ----------------------------------------------------------------------------
// Events and Listeners
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established,
    ContactJoined {
        account: Account,
        display_name: String,
    },
    ContactLeft {
        account: Account,
    },
    AllContactsLeft,
    /// Fired once, and only for sessions that were established
    Closed,
    Message {
        sender: Account,
        content: MessageContent,
    },
    InvitationFailed {
        account: Account,
        code: u16,
    },
    DeliveryFailed {
        transaction: TransactionId,
    },
}

impl SessionEvent {
    /// Whether this event changes who is in the conversation
    pub fn changes_membership(&self) -> bool {
        matches!(
            self,
            SessionEvent::Established
                | SessionEvent::ContactJoined { .. }
                | SessionEvent::ContactLeft { .. }
        )
    }
}

pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, session: &SwitchboardSession, event: &SessionEvent);

    /// The channel closed; the session will produce no further events
    fn on_session_released(&self, _session: &SwitchboardSession) {}
}

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    hash: Option<SessionHash>,
    handshake: Option<TransactionId>,
    ever_established: bool,
    members: BTreeMap<Account, MembershipState>,
    pending_invitations: VecDeque<Account>,
    pending_messages: VecDeque<OutboundPayload>,
    /// `CAL` transactions not yet answered by a join
    outstanding_calls: HashMap<TransactionId, Account>,
    /// Membership events seen before the handshake completed (`IRO` roster)
    deferred_events: Vec<SessionEvent>,
    all_left_fired: bool,
    released: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Created,
            hash: None,
            handshake: None,
            ever_established: false,
            members: BTreeMap::new(),
            pending_invitations: VecDeque::new(),
            pending_messages: VecDeque::new(),
            outstanding_calls: HashMap::new(),
            deferred_events: Vec::new(),
            all_left_fired: false,
            released: false,
        }
    }

    fn has_joined_member(&self) -> bool {
        self.members
            .values()
            .any(|state| *state == MembershipState::Joined)
    }
}

struct SessionShared {
    key: SessionKey,
    owner: Owner,
    origin: SessionOrigin,
    config: SwitchboardConfig,
    processor: Arc<MessageProcessor>,
    chunker: MessageChunker,
    state: Mutex<SessionState>,
    reassembler: Mutex<ChunkReassembler<SharedTimeSource>>,
    phase: watch::Sender<SessionPhase>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    p2p: RwLock<Option<Arc<dyn PeerToPeerHandler>>>,
}

// ----------------------------------------------------------------------------
// Switchboard Session
// ----------------------------------------------------------------------------

/// Cloneable handle to one switchboard session
#[derive(Clone)]
pub struct SwitchboardSession {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SwitchboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("SwitchboardSession")
            .field("key", &self.shared.key)
            .field("origin", &self.shared.origin)
            .field("phase", &state.phase)
            .field("hash", &state.hash)
            .field("members", &state.members)
            .finish()
    }
}

impl PartialEq for SwitchboardSession {
    fn eq(&self, other: &Self) -> bool {
        self.shared.key == other.shared.key
    }
}

impl Eq for SwitchboardSession {}

impl SwitchboardSession {
    pub fn new(
        owner: Owner,
        origin: SessionOrigin,
        config: &MsnpConfig,
        time_source: SharedTimeSource,
    ) -> Self {
        let processor = MessageProcessor::new(ChannelKind::Switchboard, config.channels.clone());
        let switchboard = config.switchboard.clone();
        let reassembler = ChunkReassembler::new(time_source)
            .with_expiry(switchboard.reassembly_expiry)
            .with_max_chunks(switchboard.max_chunks);
        let (phase, _) = watch::channel(SessionPhase::Created);

        let shared = Arc::new(SessionShared {
            key: SessionKey::next(),
            owner,
            origin,
            chunker: MessageChunker::new(switchboard.max_chunk_payload),
            config: switchboard,
            processor,
            state: Mutex::new(SessionState::new()),
            reassembler: Mutex::new(reassembler),
            phase,
            listeners: RwLock::new(Vec::new()),
            p2p: RwLock::new(None),
        });
        shared.processor.register_handler(Arc::new(SessionHandler {
            session: Arc::downgrade(&shared),
        }));
        Self { shared }
    }

    /// Session for a conversation started locally
    pub fn local(owner: Owner, config: &MsnpConfig, time_source: SharedTimeSource) -> Self {
        Self::new(owner, SessionOrigin::Local, config, time_source)
    }

    /// Session answering an invitation, with the hash already known
    pub fn invited(
        owner: Owner,
        session_id: SessionId,
        hash: SessionHash,
        inviter: Account,
        config: &MsnpConfig,
        time_source: SharedTimeSource,
    ) -> Self {
        let session = Self::new(
            owner,
            SessionOrigin::Invited {
                session_id,
                inviter,
            },
            config,
            time_source,
        );
        session.set_hash(hash);
        session
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn key(&self) -> SessionKey {
        self.shared.key
    }

    pub fn owner(&self) -> &Owner {
        &self.shared.owner
    }

    pub fn origin(&self) -> &SessionOrigin {
        &self.shared.origin
    }

    pub fn is_invited(&self) -> bool {
        matches!(self.shared.origin, SessionOrigin::Invited { .. })
    }

    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.shared.processor
    }

    pub fn hash(&self) -> Option<SessionHash> {
        lock(&self.shared.state).hash.clone()
    }

    /// Bind the server-issued hash used by the handshake
    pub fn set_hash(&self, hash: SessionHash) {
        lock(&self.shared.state).hash = Some(hash);
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.shared.state).phase
    }

    pub fn is_established(&self) -> bool {
        self.phase().is_established()
    }

    pub fn is_closed(&self) -> bool {
        self.phase().is_closed()
    }

    pub fn was_established(&self) -> bool {
        lock(&self.shared.state).ever_established
    }

    pub fn membership(&self, account: &Account) -> Option<MembershipState> {
        lock(&self.shared.state).members.get(account).copied()
    }

    pub fn members(&self) -> Vec<(Account, MembershipState)> {
        lock(&self.shared.state)
            .members
            .iter()
            .map(|(account, state)| (account.clone(), *state))
            .collect()
    }

    pub fn joined_members(&self) -> Vec<Account> {
        lock(&self.shared.state)
            .members
            .iter()
            .filter(|(_, state)| **state == MembershipState::Joined)
            .map(|(account, _)| account.clone())
            .collect()
    }

    /// Remote parties this conversation is with.
    ///
    /// Joined and invited members plus queued invitations; once everyone has
    /// left, the accounts that were ever members. An invited session that has
    /// seen no members yet is with its inviter.
    pub fn participants(&self) -> BTreeSet<Account> {
        let state = lock(&self.shared.state);
        let mut active: BTreeSet<Account> = state
            .members
            .iter()
            .filter(|(_, membership)| **membership != MembershipState::Left)
            .map(|(account, _)| account.clone())
            .collect();
        active.extend(state.pending_invitations.iter().cloned());
        if active.is_empty() {
            active.extend(state.members.keys().cloned());
        }
        if active.is_empty() {
            if let SessionOrigin::Invited { inviter, .. } = &self.shared.origin {
                if !self.shared.owner.is_owner(inviter) {
                    active.insert(inviter.clone());
                }
            }
        }
        active
    }

    pub fn pending_invitation_count(&self) -> usize {
        lock(&self.shared.state).pending_invitations.len()
    }

    pub fn pending_message_count(&self) -> usize {
        lock(&self.shared.state).pending_messages.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        write(&self.shared.listeners).push(listener);
    }

    pub fn set_p2p_handler(&self, handler: Arc<dyn PeerToPeerHandler>) {
        *write(&self.shared.p2p) = Some(handler);
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Invite a contact; queued until the session is established
    pub fn invite(&self, account: &Account) -> MsnpResult<()> {
        if self.shared.owner.is_owner(account) {
            return Err(SessionError::SelfInvitation {
                account: account.to_string(),
            }
            .into());
        }

        let mut state = lock(&self.shared.state);
        match state.phase {
            SessionPhase::Closed => Err(SessionError::Closed.into()),
            SessionPhase::Established => {
                if state.members.get(account) == Some(&MembershipState::Joined) {
                    return Ok(());
                }
                self.send_call(&mut state, account.clone())
            }
            _ => {
                if !state.pending_invitations.contains(account) {
                    debug!("Queueing invitation for {} until established", account);
                    state.pending_invitations.push_back(account.clone());
                }
                Ok(())
            }
        }
    }

    /// Send a payload to the conversation.
    ///
    /// Queued until the session is established and someone has joined.
    pub fn send_message(&self, payload: OutboundPayload) -> MsnpResult<()> {
        let mut state = lock(&self.shared.state);
        if state.phase.is_closed() {
            return Err(SessionError::Closed.into());
        }
        if state.phase.is_established() && state.has_joined_member() {
            return self.send_now(&payload);
        }
        trace!("Queueing {} payload until a contact joins", payload.kind());
        state.pending_messages.push_back(payload);
        Ok(())
    }

    /// Leave the conversation and close the channel
    pub fn leave(&self) {
        if self.shared.processor.is_connected() {
            if let Err(e) = self.shared.processor.send(Command::new("OUT")) {
                debug!("OUT not sent: {}", e);
            }
        }
        self.abandon();
    }

    /// Close the session, whether or not its transport ever connected
    pub fn abandon(&self) {
        if self.shared.processor.is_connected() {
            self.shared.processor.close();
        } else {
            self.on_transport_closed();
        }
    }

    /// Wait until the session is established.
    ///
    /// Fails when the channel closes first or the timeout (the configured
    /// handshake timeout by default) passes.
    pub async fn wait_established(&self, timeout: Option<Duration>) -> MsnpResult<()> {
        let timeout = timeout.unwrap_or(self.shared.config.handshake_timeout);
        let mut phases = self.shared.phase.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            phases.wait_for(|phase| phase.is_established() || phase.is_closed()),
        )
        .await;

        match reached {
            Ok(Ok(phase)) if phase.is_established() => Ok(()),
            Ok(_) => Err(SessionError::Closed.into()),
            Err(_) => Err(SessionError::HandshakeTimeout {
                duration_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    fn send_call(&self, state: &mut SessionState, account: Account) -> MsnpResult<()> {
        let command = Command::new("CAL").with_arg(account.as_str());
        if let Some(transaction) = self.shared.processor.send(command)? {
            state.outstanding_calls.insert(transaction, account.clone());
        }
        state.members.insert(account, MembershipState::Invited);
        Ok(())
    }

    fn send_now(&self, payload: &OutboundPayload) -> MsnpResult<()> {
        let message = payload.to_mime(&self.shared.owner)?;
        let chunks = self.shared.chunker.split(message);
        for chunk in chunks {
            let command = Command::new("MSG")
                .with_arg(payload.ack_mode())
                .with_mime(chunk);
            self.shared.processor.send(command)?;
        }
        Ok(())
    }

    fn flush_messages(&self, state: &mut SessionState) {
        while let Some(payload) = state.pending_messages.pop_front() {
            if let Err(e) = self.send_now(&payload) {
                warn!("Dropping queued {} payload: {}", payload.kind(), e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Channel Callbacks
    // ------------------------------------------------------------------------

    fn on_transport_connected(&self) {
        let mut state = lock(&self.shared.state);
        let Some(hash) = state.hash.clone() else {
            warn!("Switchboard connected without a session hash, closing");
            drop(state);
            self.shared.processor.close();
            return;
        };

        if state.phase.is_closed() {
            debug!(
                "Switchboard session {} connected after it was closed, dropping transport",
                self.shared.key.value()
            );
            drop(state);
            self.shared.processor.close();
            return;
        }
        let transition = match state.phase.transition(SessionTrigger::TransportConnected) {
            Ok(transition) => transition,
            Err(e) => {
                warn!("Ignoring transport connect: {}", e);
                return;
            }
        };

        let command = match &self.shared.origin {
            SessionOrigin::Local => Command::new("USR").with_arg(hash.as_str()),
            SessionOrigin::Invited { session_id, .. } => Command::new("ANS")
                .with_arg(hash.as_str())
                .with_arg(session_id.to_string()),
        };

        match self.shared.processor.send(command) {
            Ok(transaction) => {
                state.phase = transition.to;
                state.handshake = transaction;
                let _ = self.shared.phase.send_replace(transition.to);
                debug!("Switchboard handshake sent ({})", transition);
            }
            Err(e) => warn!("Switchboard handshake not sent: {}", e),
        }
    }

    fn on_handshake_reply(&self, command: &Command) -> Vec<SessionEvent> {
        let mut state = lock(&self.shared.state);
        if state.phase != SessionPhase::AwaitingHandshakeReply {
            trace!("Ignoring {} outside of handshake", command.name());
            return Vec::new();
        }
        if command.arg(0) != Some("OK") {
            warn!("Switchboard handshake rejected: {}", command);
            return Vec::new();
        }
        if command.is("USR") {
            let echoed = command.arg(1).and_then(|value| Account::new(value).ok());
            if echoed.as_ref() != Some(&self.shared.owner.account) {
                warn!("Switchboard handshake echoed a different account: {}", command);
                return Vec::new();
            }
        }

        let transition = match state.phase.transition(SessionTrigger::HandshakeAccepted) {
            Ok(transition) => transition,
            Err(e) => {
                warn!("Handshake reply not applied: {}", e);
                return Vec::new();
            }
        };
        state.phase = transition.to;
        state.ever_established = true;
        let _ = self.shared.phase.send_replace(transition.to);
        info!("Switchboard session {} established", self.shared.key.value());

        let mut events = vec![SessionEvent::Established];
        events.append(&mut state.deferred_events);
        while let Some(account) = state.pending_invitations.pop_front() {
            if let Err(e) = self.send_call(&mut state, account.clone()) {
                warn!("Queued invitation for {} not sent: {}", account, e);
            }
        }
        if state.has_joined_member() {
            self.flush_messages(&mut state);
        }
        drop(state);

        let handler = read(&self.shared.p2p).clone();
        if let Some(handler) = handler {
            handler.on_session_bound(self);
        }
        events
    }

    fn on_joined(&self, account: Account, display_name: String) -> Vec<SessionEvent> {
        if self.shared.owner.is_owner(&account) {
            trace!("Ignoring own join on switchboard");
            return Vec::new();
        }

        let mut state = lock(&self.shared.state);
        if state.phase.is_closed() {
            return Vec::new();
        }
        state.members.insert(account.clone(), MembershipState::Joined);
        state.outstanding_calls.retain(|_, invited| *invited != account);
        state.all_left_fired = false;
        debug!("{} joined switchboard {}", account, self.shared.key.value());

        let event = SessionEvent::ContactJoined {
            account,
            display_name,
        };
        if !state.phase.is_established() {
            state.deferred_events.push(event);
            return Vec::new();
        }
        self.flush_messages(&mut state);
        vec![event]
    }

    fn on_left(&self, account: Account) -> Vec<SessionEvent> {
        if self.shared.owner.is_owner(&account) {
            return Vec::new();
        }

        let mut state = lock(&self.shared.state);
        if state.phase.is_closed() {
            return Vec::new();
        }
        state.members.insert(account.clone(), MembershipState::Left);
        debug!("{} left switchboard {}", account, self.shared.key.value());

        let mut events = vec![SessionEvent::ContactLeft { account }];
        if !state.has_joined_member() && !state.all_left_fired {
            state.all_left_fired = true;
            events.push(SessionEvent::AllContactsLeft);
        }
        if !state.phase.is_established() {
            state.deferred_events.append(&mut events);
        }
        events
    }

    fn on_message(&self, command: &Command) -> MsnpResult<Vec<SessionEvent>> {
        let sender = Account::new(command.require_arg(0)?)?;
        let Some(message) = command.mime() else {
            return Ok(Vec::new());
        };

        if is_p2p(message) {
            let handler = read(&self.shared.p2p).clone();
            match handler {
                Some(handler) => handler.on_p2p_message(self, &sender, message),
                None => trace!("No peer-to-peer handler, dropping P2P data from {}", sender),
            }
            return Ok(Vec::new());
        }

        let copy = MimeMessage::from_parts(message.headers().clone(), message.body().to_vec());
        let Some(complete) = lock(&self.shared.reassembler).accept(copy)? else {
            return Ok(Vec::new());
        };

        match classify(&complete) {
            Some(content) => Ok(vec![SessionEvent::Message { sender, content }]),
            None => {
                trace!(
                    "Dropping message with content type {:?}",
                    complete.content_type()
                );
                Ok(Vec::new())
            }
        }
    }

    fn on_command(&self, command: &Command) -> MsnpResult<Vec<SessionEvent>> {
        match command.name() {
            "USR" | "ANS" => Ok(self.on_handshake_reply(command)),
            "IRO" => {
                // IRO <txn> <current> <total> <account> <name>
                let account = Account::new(command.require_arg(2)?)?;
                let name = decode_display_name(command.arg(3).unwrap_or_default());
                Ok(self.on_joined(account, name))
            }
            "JOI" => {
                let account = Account::new(command.require_arg(0)?)?;
                let name = decode_display_name(command.arg(1).unwrap_or_default());
                Ok(self.on_joined(account, name))
            }
            "BYE" => {
                let raw = command.require_arg(0)?;
                let account = Account::new(raw.split(';').next().unwrap_or(raw))?;
                Ok(self.on_left(account))
            }
            "MSG" => self.on_message(command),
            "NAK" => Ok(command
                .transaction()
                .map(|transaction| vec![SessionEvent::DeliveryFailed { transaction }])
                .unwrap_or_default()),
            "ACK" => {
                trace!("Delivery acknowledged: {:?}", command.transaction());
                Ok(Vec::new())
            }
            "CAL" => {
                trace!("Invitation ringing: {}", command);
                Ok(Vec::new())
            }
            other => {
                trace!("Ignoring {} on switchboard", other);
                Ok(Vec::new())
            }
        }
    }

    fn on_protocol_error(&self, error: &ProtocolErrorCode) -> Vec<SessionEvent> {
        let Some(transaction) = error.transaction else {
            return Vec::new();
        };
        let mut state = lock(&self.shared.state);
        if state.handshake == Some(transaction) {
            warn!("Switchboard handshake failed with {}", error.code);
            return Vec::new();
        }
        match state.outstanding_calls.remove(&transaction) {
            Some(account) => {
                warn!("Invitation for {} failed with {}", account, error.code);
                vec![SessionEvent::InvitationFailed {
                    account,
                    code: error.code,
                }]
            }
            None => Vec::new(),
        }
    }

    fn on_transport_closed(&self) {
        let fire_closed = {
            let mut state = lock(&self.shared.state);
            if state.released {
                return;
            }
            state.released = true;
            if let Ok(transition) = state.phase.transition(SessionTrigger::TransportClosed) {
                state.phase = transition.to;
            }
            let dropped = state.pending_invitations.len() + state.pending_messages.len();
            if dropped > 0 {
                debug!("Dropping {} queued items on close", dropped);
            }
            state.pending_invitations.clear();
            state.pending_messages.clear();
            state.outstanding_calls.clear();
            state.deferred_events.clear();
            state.ever_established
        };
        lock(&self.shared.reassembler).clear();
        let _ = self.shared.phase.send_replace(SessionPhase::Closed);
        info!("Switchboard session {} closed", self.shared.key.value());

        if fire_closed {
            self.emit(vec![SessionEvent::Closed]);
        }
        for listener in self.snapshot_listeners() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_session_released(self)));
            if let Err(panic) = result {
                warn!("Session listener panicked on release: {}", panic_message(&*panic));
            }
        }
    }

    fn emit(&self, events: Vec<SessionEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = self.snapshot_listeners();
        for event in &events {
            for listener in &listeners {
                let result =
                    catch_unwind(AssertUnwindSafe(|| listener.on_session_event(self, event)));
                if let Err(panic) = result {
                    warn!("Session listener panicked: {}", panic_message(&*panic));
                }
            }
        }
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        read(&self.shared.listeners).clone()
    }
}

// ----------------------------------------------------------------------------
// Channel Handler
// ----------------------------------------------------------------------------

/// Connects a session to its processor without keeping the session alive
struct SessionHandler {
    session: Weak<SessionShared>,
}

impl SessionHandler {
    fn session(&self) -> Option<SwitchboardSession> {
        self.session
            .upgrade()
            .map(|shared| SwitchboardSession { shared })
    }
}

impl ChannelHandler for SessionHandler {
    fn name(&self) -> &str {
        "switchboard-session"
    }

    fn handle_command(&self, _processor: &MessageProcessor, command: &Command) -> MsnpResult<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let events = session.on_command(command)?;
        session.emit(events);
        Ok(())
    }

    fn on_connected(&self, _processor: &MessageProcessor) {
        if let Some(session) = self.session() {
            session.on_transport_connected();
        }
    }

    fn on_disconnected(&self, _processor: &MessageProcessor) {
        if let Some(session) = self.session() {
            session.on_transport_closed();
        }
    }

    fn on_protocol_error(&self, _processor: &MessageProcessor, error: &ProtocolErrorCode) {
        if let Some(session) = self.session() {
            let events = session.on_protocol_error(error);
            session.emit(events);
        }
    }
}
