//! Transport Integration Tests
//!
//! Runs sessions over `tokio::io::duplex` streams with a scripted server on
//! the other end, framed with the same codec the client uses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use msnp_core::{FrameCodec, MsnpConfig, SessionHash, TextMessage};
use msnp_runtime::{
    Account, ClientType, ContactDirectory, ContactInfo, ConversationEventKind,
    ConversationRegistry, DeliveryRoute, MessageProcessor, MessageRouter, MsnpResult,
    NotificationSession, OfflineMessageService, OutboundPayload, Owner, PresenceStatus,
    SwitchboardConnector,
};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(2);

fn account(value: &str) -> Account {
    Account::new(value).unwrap()
}

fn owner() -> Owner {
    Owner::new(account("me@example.com"), "MyName")
}

async fn expect_line(server: &mut Framed<DuplexStream, FrameCodec>) -> String {
    let frame = timeout(WAIT, server.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("valid frame");
    String::from_utf8_lossy(&frame)
        .split("\r\n")
        .next()
        .unwrap_or_default()
        .to_string()
}

async fn reply(server: &mut Framed<DuplexStream, FrameCodec>, line: &str) {
    server
        .send(Bytes::from(format!("{}\r\n", line)))
        .await
        .unwrap();
}

/// Connector that hands each switchboard an in-memory stream
struct DuplexConnector {
    servers: mpsc::UnboundedSender<(String, DuplexStream)>,
}

#[async_trait]
impl SwitchboardConnector for DuplexConnector {
    async fn connect(
        &self,
        processor: Arc<MessageProcessor>,
        address: &str,
    ) -> MsnpResult<JoinHandle<()>> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _ = self.servers.send((address.to_string(), server));
        Ok(processor.attach(client))
    }
}

#[derive(Default)]
struct Directory(HashMap<Account, ContactInfo>);

impl Directory {
    fn with(mut self, contact: ContactInfo) -> Self {
        self.0.insert(contact.account.clone(), contact);
        self
    }
}

impl ContactDirectory for Directory {
    fn lookup(&self, account: &Account, network: ClientType) -> Option<ContactInfo> {
        self.0
            .get(account)
            .filter(|contact| contact.network == network)
            .cloned()
    }

    fn find(&self, account: &Account) -> Option<ContactInfo> {
        self.0.get(account).cloned()
    }
}

#[derive(Default)]
struct OfflineStore(Mutex<Vec<(Account, String)>>);

#[async_trait]
impl OfflineMessageService for OfflineStore {
    async fn store_message(&self, recipient: &ContactInfo, message: &TextMessage) -> MsnpResult<()> {
        self.0
            .lock()
            .unwrap()
            .push((recipient.account.clone(), message.text.clone()));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Switchboard over a stream
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_session_over_duplex_stream() {
    let _ = tracing_subscriber::fmt::try_init();
    let registry = ConversationRegistry::new(owner(), MsnpConfig::testing().into_shared());
    let mut events = registry.subscribe();
    let (id, session) = registry.create_conversation().unwrap();
    session.set_hash(SessionHash::new("abc123"));
    session.invite(&account("bob@example.com")).unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut server = Framed::new(server, FrameCodec::default());
    let reader = session.processor().attach(client);

    assert_eq!(expect_line(&mut server).await, "USR 1 abc123");
    reply(&mut server, "USR 1 OK me@example.com MyName").await;
    session.wait_established(Some(WAIT)).await.unwrap();

    assert_eq!(expect_line(&mut server).await, "CAL 2 bob@example.com");
    reply(&mut server, "CAL 2 RINGING 11752013").await;
    reply(&mut server, "JOI bob@example.com Bob").await;

    session
        .send_message(OutboundPayload::Text(TextMessage::new("hello")))
        .unwrap();
    assert!(expect_line(&mut server).await.starts_with("MSG 3 N "));

    drop(server);
    timeout(WAIT, reader).await.unwrap().unwrap();
    assert!(session.is_closed());

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .inspect(|event| assert_eq!(event.conversation_id, id))
        .map(|event| event.kind)
        .collect();
    assert_eq!(kinds.first().map(|kind| kind.name()), Some("created"));
    assert!(kinds.contains(&ConversationEventKind::ContactJoined {
        account: account("bob@example.com"),
        display_name: "Bob".to_string(),
    }));
    assert_eq!(kinds.last(), Some(&ConversationEventKind::Ended));
}

#[tokio::test]
async fn test_wait_established_times_out() {
    let registry = ConversationRegistry::new(owner(), MsnpConfig::testing().into_shared());
    let (_, session) = registry.create_conversation().unwrap();
    session.set_hash(SessionHash::new("abc123"));
    let (client, _server) = tokio::io::duplex(1024);
    let _reader = session.processor().attach(client);

    let result = session
        .wait_established(Some(Duration::from_millis(50)))
        .await;
    assert!(result.is_err());
}

// ----------------------------------------------------------------------------
// Routing end to end
// ----------------------------------------------------------------------------

struct Harness {
    router: MessageRouter,
    notification_server: Framed<DuplexStream, FrameCodec>,
    switchboards: mpsc::UnboundedReceiver<(String, DuplexStream)>,
    offline: Arc<OfflineStore>,
}

fn harness(directory: Directory) -> Harness {
    let _ = tracing_subscriber::fmt::try_init();
    let config = MsnpConfig::testing();
    let registry = ConversationRegistry::new(owner(), config.clone().into_shared());
    let (servers, switchboards) = mpsc::unbounded_channel();
    let notification = NotificationSession::new(
        owner(),
        &config,
        Arc::clone(&registry),
        Arc::new(DuplexConnector { servers }),
    );
    let (client, server) = tokio::io::duplex(64 * 1024);
    notification.processor().attach(client);

    let offline = Arc::new(OfflineStore::default());
    let router = MessageRouter::new(
        Arc::new(directory),
        registry,
        notification,
        Arc::clone(&offline) as Arc<dyn OfflineMessageService>,
    );
    Harness {
        router,
        notification_server: Framed::new(server, FrameCodec::default()),
        switchboards,
        offline,
    }
}

#[tokio::test]
async fn test_router_opens_switchboard_for_online_contact() {
    let bob = account("bob@example.com");
    let mut harness = harness(Directory::default().with(ContactInfo::new(
        bob.clone(),
        ClientType::Passport,
        PresenceStatus::Online,
    )));

    let route = harness
        .router
        .send(&bob, OutboundPayload::Text(TextMessage::new("hi bob")))
        .await
        .unwrap();
    let DeliveryRoute::Switchboard(id) = route else {
        panic!("expected switchboard delivery, got {:?}", route);
    };

    assert_eq!(expect_line(&mut harness.notification_server).await, "XFR 1 SB");
    reply(
        &mut harness.notification_server,
        "XFR 1 SB 10.0.0.1:1863 CKI 17262740.1050826919.32308",
    )
    .await;

    let (address, stream) = timeout(WAIT, harness.switchboards.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(address, "10.0.0.1:1863");
    let mut switchboard = Framed::new(stream, FrameCodec::default());
    assert_eq!(
        expect_line(&mut switchboard).await,
        "USR 1 17262740.1050826919.32308"
    );
    reply(&mut switchboard, "USR 1 OK me@example.com MyName").await;
    assert_eq!(expect_line(&mut switchboard).await, "CAL 2 bob@example.com");
    reply(&mut switchboard, "JOI bob@example.com Bob").await;
    assert!(expect_line(&mut switchboard).await.starts_with("MSG 3 N "));

    // A second message reuses the conversation
    let again = harness
        .router
        .send(&bob, OutboundPayload::Nudge)
        .await
        .unwrap();
    assert_eq!(again, DeliveryRoute::Switchboard(id));
    assert!(expect_line(&mut switchboard).await.starts_with("MSG 4 N "));
}

#[tokio::test]
async fn test_router_bridge_wins_over_offline() {
    let pal = account("pal@yahoo.com");
    let mut harness = harness(Directory::default().with(ContactInfo::new(
        pal.clone(),
        ClientType::Yahoo,
        PresenceStatus::Offline,
    )));

    let rejected = harness
        .router
        .send(&pal, OutboundPayload::Ink { data: "R0lG".into() })
        .await;
    assert!(rejected.is_err());

    let route = harness
        .router
        .send(&pal, OutboundPayload::Text(TextMessage::new("hey")))
        .await
        .unwrap();
    assert_eq!(route, DeliveryRoute::Bridge);
    // The rejected payload never reached the wire
    assert!(expect_line(&mut harness.notification_server)
        .await
        .starts_with("UUM 1 pal@yahoo.com 32 1 "));
}

#[tokio::test]
async fn test_router_replies_on_known_network() {
    let pal = account("pal@yahoo.com");
    let mut harness = harness(Directory::default().with(ContactInfo::new(
        pal.clone(),
        ClientType::Yahoo,
        PresenceStatus::Online,
    )));

    let wrong_network = harness
        .router
        .send_on_network(&pal, ClientType::Passport, OutboundPayload::Nudge)
        .await;
    assert!(wrong_network.is_err());

    let route = harness
        .router
        .send_on_network(&pal, ClientType::Yahoo, OutboundPayload::Nudge)
        .await
        .unwrap();
    assert_eq!(route, DeliveryRoute::Bridge);
    assert!(expect_line(&mut harness.notification_server)
        .await
        .starts_with("UUM 1 pal@yahoo.com 32 3 "));
}

#[tokio::test]
async fn test_router_stores_text_for_offline_contact() {
    let carol = account("carol@example.com");
    let harness = harness(Directory::default().with(ContactInfo::new(
        carol.clone(),
        ClientType::Passport,
        PresenceStatus::Offline,
    )));

    let route = harness
        .router
        .send(&carol, OutboundPayload::Text(TextMessage::new("later")))
        .await
        .unwrap();
    assert_eq!(route, DeliveryRoute::StoreAndForward);
    assert!(harness
        .router
        .send(&carol, OutboundPayload::Nudge)
        .await
        .is_err());
    assert_eq!(
        harness.offline.0.lock().unwrap().clone(),
        vec![(carol, "later".to_string())]
    );
}

#[tokio::test]
async fn test_router_rejects_unknown_recipient() {
    let harness = harness(Directory::default());
    let result = harness
        .router
        .send(&account("nobody@example.com"), OutboundPayload::Nudge)
        .await;
    assert!(result.is_err());
}
