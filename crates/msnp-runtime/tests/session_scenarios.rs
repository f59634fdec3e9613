//! Switchboard and Registry Scenarios
//!
//! Drives sessions through in-process channels: frames are fed with
//! `on_bytes_received` and outbound frames read back from the queue returned
//! by `open_channel`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use msnp_core::{
    protocol::mime::{HEADER_CHUNK, HEADER_CHUNKS, HEADER_MESSAGE_ID},
    Inbound, MsnpConfig, RegistryError, SessionHash, SessionId, SystemTimeSource,
};
use msnp_runtime::{
    Account, ChannelEvent, ConversationEvent, ConversationEventKind, ConversationId,
    ConversationRegistry, IdGenerator, Initiator, MembershipState, MsnpError, OutboundPayload,
    Owner, SessionPhase, SwitchboardSession, TextMessage,
};
use tokio::sync::{broadcast, mpsc};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn account(value: &str) -> Account {
    Account::new(value).unwrap()
}

fn owner() -> Owner {
    Owner::new(account("me@example.com"), "MyName")
}

fn registry() -> Arc<ConversationRegistry> {
    let _ = tracing_subscriber::fmt::try_init();
    ConversationRegistry::new(owner(), MsnpConfig::testing().into_shared())
}

fn drain(outbound: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Bytes> {
    let mut frames = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        frames.push(frame);
    }
    frames
}

fn lines(frames: &[Bytes]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| {
            let text = String::from_utf8_lossy(frame);
            text.split("\r\n").next().unwrap_or_default().to_string()
        })
        .collect()
}

fn drain_events(events: &mut broadcast::Receiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

/// Local session established with `bob@example.com` joined
fn established_with_bob(
    registry: &ConversationRegistry,
) -> (ConversationId, SwitchboardSession, mpsc::UnboundedReceiver<Bytes>) {
    let (id, session) = registry.create_conversation().unwrap();
    session.set_hash(SessionHash::new("abc123"));
    session.invite(&account("bob@example.com")).unwrap();
    let mut outbound = session.processor().open_channel();
    session
        .processor()
        .on_bytes_received(b"USR 1 OK me@example.com MyName\r\n");
    session
        .processor()
        .on_bytes_received(b"JOI bob@example.com Bob\r\n");
    drain(&mut outbound);
    (id, session, outbound)
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

#[test]
fn test_simple_chat_flushes_queued_invitation() {
    let registry = registry();
    let (_, session) = registry.create_conversation().unwrap();
    session.set_hash(SessionHash::new("abc123"));
    session.invite(&account("friend@example.com")).unwrap();
    assert_eq!(session.pending_invitation_count(), 1);

    let mut outbound = session.processor().open_channel();
    assert_eq!(lines(&drain(&mut outbound)), vec!["USR 1 abc123"]);
    assert_eq!(session.phase(), SessionPhase::AwaitingHandshakeReply);

    session
        .processor()
        .on_bytes_received(b"USR 1 OK me@example.com MyName\r\n");
    assert!(session.is_established());
    assert_eq!(lines(&drain(&mut outbound)), vec!["CAL 2 friend@example.com"]);
    assert_eq!(
        session.membership(&account("friend@example.com")),
        Some(MembershipState::Invited)
    );
}

#[test]
fn test_answer_handshake_for_invitation() {
    let registry = registry();
    let (_, session) = registry
        .accept_invitation(
            SessionId::new(11752013),
            SessionHash::new("17262740.1050826919.32308"),
            account("bob@example.com"),
        )
        .unwrap();
    let mut outbound = session.processor().open_channel();
    assert_eq!(
        lines(&drain(&mut outbound)),
        vec!["ANS 1 17262740.1050826919.32308 11752013"]
    );

    session
        .processor()
        .on_bytes_received(b"IRO 1 1 1 bob@example.com Bob\r\n");
    session.processor().on_bytes_received(b"ANS 1 OK\r\n");
    assert!(session.is_established());
    assert_eq!(session.joined_members(), vec![account("bob@example.com")]);
}

#[test]
fn test_rejected_handshake_never_establishes() {
    let registry = registry();
    let mut events = registry.subscribe();
    let (_, session) = registry.create_conversation().unwrap();
    session.set_hash(SessionHash::new("abc123"));
    let _outbound = session.processor().open_channel();

    session.processor().on_bytes_received(b"911 1\r\n");
    session.processor().close();

    assert!(!session.was_established());
    let kinds: Vec<_> = drain_events(&mut events)
        .into_iter()
        .map(|event| event.kind.name())
        .collect();
    assert_eq!(kinds, vec!["created"]);
}

#[test]
fn test_roster_before_answer_stays_silent_if_never_established() {
    let registry = registry();
    let mut events = registry.subscribe();
    let (id, session) = registry
        .accept_invitation(
            SessionId::new(11752013),
            SessionHash::new("17262740.1050826919.32308"),
            account("bob@example.com"),
        )
        .unwrap();
    let _outbound = session.processor().open_channel();

    session
        .processor()
        .on_bytes_received(b"IRO 1 1 1 bob@example.com Bob\r\n");
    session.processor().close();

    assert!(!session.was_established());
    assert!(registry.session(id).is_none());
    let kinds: Vec<_> = drain_events(&mut events)
        .into_iter()
        .map(|event| event.kind.name())
        .collect();
    assert_eq!(kinds, vec!["created"]);
}

#[test]
fn test_roster_before_answer_is_published_once_established() {
    let registry = registry();
    let mut events = registry.subscribe();
    let (id, session) = registry
        .accept_invitation(
            SessionId::new(11752013),
            SessionHash::new("17262740.1050826919.32308"),
            account("bob@example.com"),
        )
        .unwrap();
    let _outbound = session.processor().open_channel();

    session
        .processor()
        .on_bytes_received(b"IRO 1 1 1 bob@example.com Bob\r\n");
    session.processor().on_bytes_received(b"ANS 1 OK\r\n");

    let kinds: Vec<_> = drain_events(&mut events)
        .into_iter()
        .inspect(|event| assert_eq!(event.conversation_id, id))
        .map(|event| event.kind.name())
        .collect();
    assert_eq!(kinds, vec!["created", "contact-joined"]);
}

// ----------------------------------------------------------------------------
// Chunking
// ----------------------------------------------------------------------------

#[test]
fn test_chunked_message_is_split_on_the_wire() {
    let registry = registry();
    let (_, session, mut outbound) = established_with_bob(&registry);

    let text = "a".repeat(3000);
    session
        .send_message(OutboundPayload::Text(TextMessage::new(text)))
        .unwrap();

    let frames = drain(&mut outbound);
    assert_eq!(frames.len(), 3);

    let mut message_ids = Vec::new();
    let mut sizes = Vec::new();
    for (index, frame) in frames.iter().enumerate() {
        let Inbound::Command(command) = Inbound::parse(frame).unwrap() else {
            panic!("expected a command");
        };
        // Read back with the inbound layout, the transaction id is the first argument
        assert!(command.is("MSG"));
        assert_eq!(command.arg(0), Some((index + 3).to_string().as_str()));
        assert_eq!(command.arg(1), Some("N"));
        let mime = command.mime().unwrap();
        sizes.push(mime.body().len());
        message_ids.push(mime.header(HEADER_MESSAGE_ID).unwrap().to_string());
        if index == 0 {
            assert_eq!(mime.header(HEADER_CHUNKS), Some("3"));
            assert_eq!(mime.header(HEADER_CHUNK), None);
        } else {
            assert_eq!(mime.header(HEADER_CHUNK), Some(index.to_string().as_str()));
        }
    }
    assert_eq!(sizes, vec![1400, 1400, 200]);
    assert!(message_ids.iter().all(|id| *id == message_ids[0]));
}

#[test]
fn test_inbound_chunks_reassemble_into_one_event() {
    let registry = registry();
    let (id, session, _outbound) = established_with_bob(&registry);
    let mut events = registry.subscribe();

    let first = "MIME-Version: 1.0\r\nContent-Type: text/plain; charset=UTF-8\r\nMessage-ID: {A1}\r\nChunks: 2\r\n\r\nhello ";
    let second = "Message-ID: {A1}\r\nChunk: 1\r\n\r\nworld";
    let frame = |body: &str| format!("MSG bob@example.com Bob {}\r\n{}", body.len(), body);

    session
        .processor()
        .on_bytes_received(frame(first).as_bytes());
    assert!(drain_events(&mut events).is_empty());

    session
        .processor()
        .on_bytes_received(frame(second).as_bytes());
    let received = drain_events(&mut events);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].conversation_id, id);
    match &received[0].kind {
        ConversationEventKind::TextMessage { sender, message } => {
            assert_eq!(sender, &account("bob@example.com"));
            assert_eq!(message.text, "hello world");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_orphan_chunk_is_reported() {
    let registry = registry();
    let (_, session, _outbound) = established_with_bob(&registry);
    let mut channel_events = session.processor().subscribe();

    let body = "Message-ID: {B2}\r\nChunk: 1\r\n\r\nlost";
    let frame = format!("MSG bob@example.com Bob {}\r\n{}", body.len(), body);
    session.processor().on_bytes_received(frame.as_bytes());

    match channel_events.try_recv().unwrap() {
        ChannelEvent::HandlerFailed { handler, command, .. } => {
            assert_eq!(handler, "switchboard-session");
            assert_eq!(command, "MSG");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Membership
// ----------------------------------------------------------------------------

#[test]
fn test_rejoin_fires_joined_again() {
    let registry = registry();
    let (id, session, _outbound) = established_with_bob(&registry);
    let mut events = registry.subscribe();

    session.processor().on_bytes_received(b"BYE bob@example.com;{1234} 1\r\n");
    session.processor().on_bytes_received(b"JOI bob@example.com Bob\r\n");
    session.processor().on_bytes_received(b"BYE bob@example.com\r\n");

    let kinds: Vec<_> = drain_events(&mut events)
        .into_iter()
        .inspect(|event| assert_eq!(event.conversation_id, id))
        .map(|event| event.kind.name())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "contact-left",
            "all-contacts-left",
            "contact-joined",
            "contact-left",
            "all-contacts-left",
        ]
    );
}

#[test]
fn test_failed_invitation_is_reported() {
    let registry = registry();
    let (id, session, mut outbound) = established_with_bob(&registry);
    let mut events = registry.subscribe();

    session.invite(&account("carol@example.com")).unwrap();
    assert_eq!(lines(&drain(&mut outbound)), vec!["CAL 3 carol@example.com"]);
    session.processor().on_bytes_received(b"217 3\r\n");

    assert_eq!(
        drain_events(&mut events),
        vec![ConversationEvent {
            conversation_id: id,
            kind: ConversationEventKind::InvitationFailed {
                account: account("carol@example.com"),
                code: 217,
            },
        }]
    );
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[test]
fn test_overflow_events_use_canonical_id() {
    let registry = registry();
    let (canonical, _session, _outbound) = established_with_bob(&registry);
    let mut events = registry.subscribe();

    let (overflow_id, overflow) = registry
        .accept_invitation(
            SessionId::new(42),
            SessionHash::new("overflow-hash"),
            account("bob@example.com"),
        )
        .unwrap();
    assert_eq!(overflow_id, canonical);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.overflow_count(canonical), 1);

    let _overflow_outbound = overflow.processor().open_channel();
    overflow.processor().on_bytes_received(b"ANS 1 OK\r\n");
    overflow
        .processor()
        .on_bytes_received(b"JOI bob@example.com Bob\r\n");

    assert_eq!(
        drain_events(&mut events),
        vec![ConversationEvent {
            conversation_id: canonical,
            kind: ConversationEventKind::ContactJoined {
                account: account("bob@example.com"),
                display_name: "Bob".to_string(),
            },
        }]
    );
}

#[test]
fn test_later_registration_coalesces_either_order() {
    let registry = registry();
    let mut events = registry.subscribe();

    // Invited session first, local session second; both end up with bob
    let (first, invited) = registry
        .accept_invitation(
            SessionId::new(1),
            SessionHash::new("h1"),
            account("bob@example.com"),
        )
        .unwrap();
    let (second, local) = registry.create_conversation().unwrap();
    assert_ne!(first, second);

    local.set_hash(SessionHash::new("h2"));
    local.invite(&account("bob@example.com")).unwrap();
    let _local_outbound = local.processor().open_channel();
    local
        .processor()
        .on_bytes_received(b"USR 1 OK me@example.com MyName\r\n");

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.conversation_of(&local), Some(first));
    assert_eq!(registry.conversation_of(&invited), Some(first));

    // The absorbed id keeps resolving and its holders are told where it went
    assert_eq!(registry.canonical_id(second), Some(first));
    assert_eq!(registry.session(second), Some(invited.clone()));
    assert_eq!(registry.overflow_count(second), 1);
    let announced: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|event| event.conversation_id == second)
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        announced,
        vec![
            ConversationEventKind::Created {
                initiator: Initiator::LocalUser
            },
            ConversationEventKind::Coalesced { into: first },
        ]
    );

    // Once the merged conversation ends the alias goes with it
    invited.abandon();
    local.processor().close();
    assert!(registry.is_empty());
    assert_eq!(registry.canonical_id(second), None);
    assert!(registry.session(second).is_none());
}

#[test]
fn test_canonical_close_rebinds_to_overflow() {
    let registry = registry();
    let (canonical, session, _outbound) = established_with_bob(&registry);
    let (_, overflow) = registry
        .accept_invitation(
            SessionId::new(7),
            SessionHash::new("h7"),
            account("bob@example.com"),
        )
        .unwrap();
    let _overflow_outbound = overflow.processor().open_channel();
    overflow.processor().on_bytes_received(b"ANS 1 OK\r\n");
    let mut events = registry.subscribe();

    session.processor().close();
    assert_eq!(registry.session(canonical), Some(overflow.clone()));
    assert!(drain_events(&mut events).is_empty());

    overflow.processor().close();
    assert_eq!(
        drain_events(&mut events),
        vec![ConversationEvent {
            conversation_id: canonical,
            kind: ConversationEventKind::Ended,
        }]
    );
    assert!(registry.is_empty());
}

struct FixedIds(AtomicU64);

impl IdGenerator for FixedIds {
    fn next_id(&self) -> ConversationId {
        ConversationId::new(self.0.load(Ordering::SeqCst))
    }
}

#[test]
fn test_id_exhaustion_is_fatal() {
    let registry = ConversationRegistry::with_services(
        owner(),
        MsnpConfig::testing().into_shared(),
        Arc::new(SystemTimeSource::new()),
        Arc::new(FixedIds(AtomicU64::new(7))),
    );
    registry.create_conversation().unwrap();

    let err = registry.create_conversation().unwrap_err();
    assert!(matches!(
        err,
        MsnpError::Registry(RegistryError::IdExhausted { attempts: 4 })
    ));
    assert_eq!(registry.len(), 1);
}
