//! Core types for the MSNP protocol
//!
//! This module defines the fundamental identity and wire types used throughout
//! the engine, using newtype patterns for validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{MsnpError, WireError};

// ----------------------------------------------------------------------------
// Account
// ----------------------------------------------------------------------------

/// A normalized account address (`user@example.com`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Account(String);

impl Account {
    /// Create a new account, normalizing case and surrounding whitespace
    pub fn new<S: AsRef<str>>(value: S) -> Result<Self, MsnpError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty()
            || !trimmed.contains('@')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(WireError::InvalidAccount {
                value: value.as_ref().to_string(),
            }
            .into());
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Get the account as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Account {
    type Err = MsnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// Client / Network Type
// ----------------------------------------------------------------------------

/// Network a contact is reachable on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientType {
    /// Native messenger account
    Passport,
    /// Live Communications Server
    Lcs,
    /// Mobile device
    Mobile,
    /// Mobile network device
    Mdns,
    /// Yahoo! Messenger, reachable only through the gateway
    Yahoo,
}

impl ClientType {
    /// Wire code used in `UUM`, `UBX`, `BYE` and friends
    pub fn code(&self) -> u32 {
        match self {
            ClientType::Passport => 1,
            ClientType::Lcs => 2,
            ClientType::Mobile => 4,
            ClientType::Mdns => 8,
            ClientType::Yahoo => 32,
        }
    }

    /// Parse a wire code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ClientType::Passport),
            2 => Some(ClientType::Lcs),
            4 => Some(ClientType::Mobile),
            8 => Some(ClientType::Mdns),
            32 => Some(ClientType::Yahoo),
            _ => None,
        }
    }

    /// Contacts on bridged networks never use a switchboard
    pub fn is_bridge(&self) -> bool {
        matches!(self, ClientType::Yahoo)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientType::Passport => "Passport",
            ClientType::Lcs => "LCS",
            ClientType::Mobile => "Mobile",
            ClientType::Mdns => "MDNS",
            ClientType::Yahoo => "Yahoo",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Presence
// ----------------------------------------------------------------------------

/// Presence status as carried by `CHG`, `ILN` and `NLN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Busy,
    Idle,
    BeRightBack,
    Away,
    OnThePhone,
    OutToLunch,
    Hidden,
    Offline,
}

impl PresenceStatus {
    /// Three-letter wire code
    pub fn code(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "NLN",
            PresenceStatus::Busy => "BSY",
            PresenceStatus::Idle => "IDL",
            PresenceStatus::BeRightBack => "BRB",
            PresenceStatus::Away => "AWY",
            PresenceStatus::OnThePhone => "PHN",
            PresenceStatus::OutToLunch => "LUN",
            PresenceStatus::Hidden => "HDN",
            PresenceStatus::Offline => "FLN",
        }
    }

    /// Parse a three-letter wire code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NLN" => Some(PresenceStatus::Online),
            "BSY" => Some(PresenceStatus::Busy),
            "IDL" => Some(PresenceStatus::Idle),
            "BRB" => Some(PresenceStatus::BeRightBack),
            "AWY" => Some(PresenceStatus::Away),
            "PHN" => Some(PresenceStatus::OnThePhone),
            "LUN" => Some(PresenceStatus::OutToLunch),
            "HDN" => Some(PresenceStatus::Hidden),
            "FLN" => Some(PresenceStatus::Offline),
            _ => None,
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, PresenceStatus::Offline)
    }
}

// ----------------------------------------------------------------------------
// Owner Identity
// ----------------------------------------------------------------------------

/// The signed-in identity on whose behalf channels are opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub account: Account,
    pub display_name: String,
    pub status: PresenceStatus,
}

impl Owner {
    pub fn new(account: Account, display_name: impl Into<String>) -> Self {
        Self {
            account,
            display_name: display_name.into(),
            status: PresenceStatus::Online,
        }
    }

    /// Check whether an account refers to the owner
    pub fn is_owner(&self, account: &Account) -> bool {
        &self.account == account
    }
}

// ----------------------------------------------------------------------------
// Protocol Identifiers
// ----------------------------------------------------------------------------

/// Per-channel transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(u32);

impl TransactionId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token issued by the server to authenticate a switchboard session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHash(String);

impl SessionHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric switchboard session id, present on remote invitations only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every chunk of one logical message (`{GUID}`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh braced, upper-case GUID
    pub fn generate() -> Self {
        Self(format!("{{{}}}", Uuid::new_v4()).to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry-unique identifier for a logical conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(u64);

impl ConversationId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Draw a random id
    pub fn random() -> Self {
        Self(Uuid::new_v4().as_u64_pair().0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_be_bytes()))
    }
}

// ----------------------------------------------------------------------------
// Display Name Encoding
// ----------------------------------------------------------------------------

/// Decode a percent-encoded display name as sent in `JOI`, `IRO` and `USR`
pub fn decode_display_name(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let high = (bytes[i + 1] as char).to_digit(16);
            let low = (bytes[i + 2] as char).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high * 16 + low) as u8);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Percent-encode a display name for the wire
pub fn encode_display_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'@' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0 + other)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Injectable clock so expiry and cleanup cadence can be tested deterministically
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Shared, type-erased time source used by long-lived sessions
pub type SharedTimeSource = Arc<dyn TimeSource + Send + Sync>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
