//! Channel message processor
//!
//! One processor per physical connection. It owns the transport, numbers
//! outgoing commands, turns inbound frames into commands and hands each one to
//! every registered handler. A failing handler is reported on the event
//! broadcast and never stops dispatch to the others.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use msnp_core::{
    ChannelConfig, Command, Envelope, FrameCodec, Inbound, MsnpError, MsnpResult,
    ProtocolErrorCode, TransactionId, TransportError,
};

use crate::sync::{lock, panic_message, read, write};

// ----------------------------------------------------------------------------
// Channel Kind
// ----------------------------------------------------------------------------

/// Which protocol channel a processor drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The long-lived presence and session-setup connection
    Notification,
    /// A per-conversation connection
    Switchboard,
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Notification => "notification",
            ChannelKind::Switchboard => "switchboard",
        }
    }
}

// ----------------------------------------------------------------------------
// Transaction Counter
// ----------------------------------------------------------------------------

/// Per-channel transaction ids, starting at 1
#[derive(Debug)]
pub struct TransactionCounter {
    next: AtomicU32,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next id
    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// The id the next allocation will return
    pub fn peek(&self) -> TransactionId {
        TransactionId::new(self.next.load(Ordering::SeqCst))
    }
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Events and Handlers
// ----------------------------------------------------------------------------

/// Lifecycle and failure notifications for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// Numeric error reply from the server
    ProtocolError(ProtocolErrorCode),
    /// A handler returned an error or panicked
    HandlerFailed {
        handler: String,
        command: String,
        reason: String,
    },
    /// Inbound bytes did not form a valid frame
    ParseFailed { reason: String },
}

/// Receives decoded commands for a channel.
///
/// Handlers run inside the channel's receive loop and must not block.
pub trait ChannelHandler: Send + Sync {
    /// Name used when reporting failures
    fn name(&self) -> &str;

    fn handle_command(&self, processor: &MessageProcessor, command: &Command) -> MsnpResult<()>;

    fn on_connected(&self, _processor: &MessageProcessor) {}

    fn on_disconnected(&self, _processor: &MessageProcessor) {}

    fn on_protocol_error(&self, _processor: &MessageProcessor, _error: &ProtocolErrorCode) {}
}

// ----------------------------------------------------------------------------
// Message Processor
// ----------------------------------------------------------------------------

/// Transport, transaction numbering and handler dispatch for one connection
pub struct MessageProcessor {
    kind: ChannelKind,
    config: ChannelConfig,
    transactions: TransactionCounter,
    handlers: RwLock<Vec<Arc<dyn ChannelHandler>>>,
    /// Writer queue; present while connected
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    connected: AtomicBool,
    events: broadcast::Sender<ChannelEvent>,
    shutdown: Notify,
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("kind", &self.kind)
            .field("connected", &self.is_connected())
            .field("next_transaction", &self.transactions.peek())
            .finish()
    }
}

impl MessageProcessor {
    pub fn new(kind: ChannelKind, config: ChannelConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer_size.max(1));
        Arc::new(Self {
            kind,
            config,
            transactions: TransactionCounter::new(),
            handlers: RwLock::new(Vec::new()),
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
            events,
            shutdown: Notify::new(),
        })
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn register_handler(&self, handler: Arc<dyn ChannelHandler>) {
        write(&self.handlers).push(handler);
    }

    pub fn handler_count(&self) -> usize {
        read(&self.handlers).len()
    }

    /// Number and queue a command for the writer.
    ///
    /// Returns the transaction id attached to the command, if the command
    /// carries one. The id is allocated and the bytes queued under one lock so
    /// ids reach the wire in increasing order.
    pub fn send(&self, mut command: Command) -> MsnpResult<Option<TransactionId>> {
        let outbound = lock(&self.outbound);
        let Some(sender) = outbound.as_ref() else {
            return Err(MsnpError::not_connected(self.kind.name()));
        };

        let transaction = if command.requires_transaction() {
            let transaction = self.transactions.next();
            command.set_transaction(transaction);
            Some(transaction)
        } else {
            None
        };

        let bytes = command.encode()?;
        trace!("{} >> {}", self.kind.name(), command);
        sender.send(Bytes::from(bytes)).map_err(|_| {
            MsnpError::Transport(TransportError::ChannelClosed {
                channel: self.kind.name(),
            })
        })?;
        Ok(transaction)
    }

    /// Open the outbound queue and mark the channel connected.
    ///
    /// The caller drives the returned receiver to the transport and feeds
    /// inbound frames to [`MessageProcessor::on_bytes_received`].
    pub fn open_channel(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(sender);
        self.connected.store(true, Ordering::SeqCst);
        debug!("{} channel connected", self.kind.name());

        for handler in self.snapshot_handlers() {
            let result = catch_unwind(AssertUnwindSafe(|| handler.on_connected(self)));
            if let Err(panic) = result {
                self.report_handler_failure(handler.name(), "connect", panic_message(&*panic));
            }
        }
        let _ = self.events.send(ChannelEvent::Connected);
        receiver
    }

    /// Run the channel over any byte stream.
    ///
    /// Spawns the writer task and the receive loop; the returned handle
    /// completes once the channel has disconnected.
    pub fn attach<S>(self: &Arc<Self>, stream: S) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(
            stream,
            FrameCodec::with_max_frame_size(self.config.max_frame_size),
        );
        let (mut sink, mut frames) = framed.split();
        let mut outbound = self.open_channel();

        let channel = self.kind.name();
        tokio::spawn(async move {
            while let Some(bytes) = outbound.recv().await {
                if let Err(e) = sink.send(bytes).await {
                    warn!("{} channel write failed: {}", channel, e);
                    break;
                }
            }
            let _ = sink.close().await;
            trace!("{} writer finished", channel);
        });

        let processor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = processor.shutdown.notified() => break,
                    frame = frames.next() => match frame {
                        Some(Ok(bytes)) => processor.on_bytes_received(&bytes),
                        Some(Err(e)) => {
                            error!("{} channel framing failed: {}", processor.kind.name(), e);
                            let _ = processor.events.send(ChannelEvent::ParseFailed {
                                reason: e.to_string(),
                            });
                            break;
                        }
                        None => break,
                    },
                }
            }
            processor.mark_disconnected();
        })
    }

    /// Open a TCP connection and attach to it
    pub async fn connect(self: &Arc<Self>, address: &str) -> MsnpResult<JoinHandle<()>> {
        info!("Connecting {} channel to {}", self.kind.name(), address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(self.attach(stream))
    }

    /// Parse one frame and dispatch it
    pub fn on_bytes_received(&self, bytes: &[u8]) {
        if !self.is_connected() {
            trace!("{} channel closed, dropping frame", self.kind.name());
            return;
        }

        match Inbound::parse(bytes) {
            Ok(Inbound::Command(command)) => {
                trace!("{} << {}", self.kind.name(), command);
                self.dispatch(&command);
            }
            Ok(Inbound::Error(code)) => {
                warn!(
                    "{} channel error {} (transaction {:?})",
                    self.kind.name(),
                    code.code,
                    code.transaction
                );
                for handler in self.snapshot_handlers() {
                    let result =
                        catch_unwind(AssertUnwindSafe(|| handler.on_protocol_error(self, &code)));
                    if let Err(panic) = result {
                        self.report_handler_failure(
                            handler.name(),
                            &code.code.to_string(),
                            panic_message(&*panic),
                        );
                    }
                }
                let _ = self.events.send(ChannelEvent::ProtocolError(code));
            }
            Err(e) => {
                warn!("{} channel dropped malformed frame: {}", self.kind.name(), e);
                let _ = self.events.send(ChannelEvent::ParseFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Close without signing off
    pub fn close(&self) {
        self.mark_disconnected();
    }

    /// Sign off (notification channel only) and close
    pub fn disconnect(&self) {
        if self.kind == ChannelKind::Notification && self.is_connected() {
            if let Err(e) = self.send(Command::new("OUT")) {
                debug!("Sign-off not sent: {}", e);
            }
        }
        self.close();
    }

    fn dispatch(&self, command: &Command) {
        for handler in self.snapshot_handlers() {
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle_command(self, command)));
            let reason = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(&*panic),
            };
            self.report_handler_failure(handler.name(), command.name(), reason);
        }
    }

    fn report_handler_failure(&self, handler: &str, command: &str, reason: String) {
        warn!(
            "{} handler '{}' failed on {}: {}",
            self.kind.name(),
            handler,
            command,
            reason
        );
        let _ = self.events.send(ChannelEvent::HandlerFailed {
            handler: handler.to_string(),
            command: command.to_string(),
            reason,
        });
    }

    fn snapshot_handlers(&self) -> Vec<Arc<dyn ChannelHandler>> {
        read(&self.handlers).clone()
    }

    fn mark_disconnected(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer flush what is queued and stop
        lock(&self.outbound).take();
        self.shutdown.notify_one();
        info!("{} channel disconnected", self.kind.name());

        for handler in self.snapshot_handlers() {
            let result = catch_unwind(AssertUnwindSafe(|| handler.on_disconnected(self)));
            if let Err(panic) = result {
                self.report_handler_failure(handler.name(), "disconnect", panic_message(&*panic));
            }
        }
        let _ = self.events.send(ChannelEvent::Disconnected);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
