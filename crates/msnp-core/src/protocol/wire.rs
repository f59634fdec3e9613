//! Text command framing
//!
//! Every command is a single space-delimited line terminated by CRLF:
//! `NAME [txn] args... [payload-length]\r\n`, optionally followed by exactly
//! `payload-length` payload bytes. Whether token 2 is a transaction id and
//! whether a payload follows depends on the command name, see [`layout`].

use core::fmt;
use smallvec::SmallVec;

use crate::envelope::{Envelope, RawPayload};
use crate::errors::{MsnpError, WireError};
use crate::protocol::mime::MimeMessage;
use crate::types::TransactionId;
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Line terminator for every command
pub const CRLF: &[u8] = b"\r\n";

/// Inline capacity for command arguments; `RNG` is the widest common command
pub const INLINE_ARGS: usize = 6;

pub type CommandArgs = SmallVec<[String; INLINE_ARGS]>;

/// Commands whose token 2 is a transaction id when received
const TRANSACTION_COMMANDS: &[&str] = &[
    "USR", "ANS", "CAL", "IRO", "XFR", "ACK", "NAK", "CHG", "ILN", "VER", "CVR", "UUM", "UUX",
    "ADL", "RML", "GCF", "CHL",
];

/// Commands followed by a MIME-formatted payload
const MIME_PAYLOAD_COMMANDS: &[&str] = &["MSG", "UBM", "UUM"];

/// Commands followed by an opaque payload when their last token is a length
const RAW_PAYLOAD_COMMANDS: &[&str] = &["UBX", "UUX", "NOT", "GCF", "ADL", "RML"];

/// Outbound commands sent without a transaction id
const UNNUMBERED_OUTBOUND: &[&str] = &["PNG", "OUT"];

// ----------------------------------------------------------------------------
// Command Layout
// ----------------------------------------------------------------------------

/// Kind of payload that follows a command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    None,
    Mime,
    Raw,
}

/// How an inbound command line is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLayout {
    pub has_transaction: bool,
    pub payload: PayloadKind,
}

/// Look up the inbound layout for a command name
pub fn layout(name: &str) -> CommandLayout {
    let payload = if MIME_PAYLOAD_COMMANDS.contains(&name) {
        PayloadKind::Mime
    } else if RAW_PAYLOAD_COMMANDS.contains(&name) {
        PayloadKind::Raw
    } else {
        PayloadKind::None
    };
    CommandLayout {
        has_transaction: TRANSACTION_COMMANDS.contains(&name),
        payload,
    }
}

/// Whether a line starts with a numeric error code rather than a command name
pub fn is_error_code(name: &str) -> bool {
    name.bytes().next().map_or(false, |b| b.is_ascii_digit())
}

/// Payload length declared by a tokenized command line, if any.
///
/// MIME-bearing commands must declare a length. Commands with an opaque
/// payload only carry one when their last token is numeric (`ADL 12 OK` is a
/// bare acknowledgement).
pub fn declared_payload_length(tokens: &[&str]) -> Result<Option<usize>> {
    let Some(name) = tokens.first() else {
        return Ok(None);
    };
    if is_error_code(name) {
        return Ok(None);
    }
    let command_layout = layout(name);
    let first_arg = if command_layout.has_transaction { 2 } else { 1 };

    match command_layout.payload {
        PayloadKind::None => Ok(None),
        PayloadKind::Mime => {
            if tokens.len() <= first_arg {
                return Err(MsnpError::missing_argument(*name, tokens.len()));
            }
            let last = tokens[tokens.len() - 1];
            last.parse::<usize>().map(Some).map_err(|_| {
                WireError::InvalidPayloadLength {
                    command: name.to_string(),
                    value: last.to_string(),
                }
                .into()
            })
        }
        PayloadKind::Raw => {
            if tokens.len() <= first_arg {
                return Ok(None);
            }
            Ok(tokens[tokens.len() - 1].parse::<usize>().ok())
        }
    }
}

/// Split a command line into tokens, ignoring repeated spaces
pub fn tokenize(line: &str) -> SmallVec<[&str; 8]> {
    line.split(' ').filter(|token| !token.is_empty()).collect()
}

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

/// Payload carried after a command line
#[derive(Debug)]
pub enum CommandPayload {
    Mime(MimeMessage),
    Raw(RawPayload),
}

impl CommandPayload {
    fn as_envelope(&self) -> &dyn Envelope {
        match self {
            CommandPayload::Mime(message) => message,
            CommandPayload::Raw(raw) => raw,
        }
    }

    fn as_envelope_mut(&mut self) -> &mut dyn Envelope {
        match self {
            CommandPayload::Mime(message) => message,
            CommandPayload::Raw(raw) => raw,
        }
    }
}

/// A named protocol command
#[derive(Debug, Default)]
pub struct Command {
    name: String,
    transaction: Option<TransactionId>,
    args: CommandArgs,
    payload: Option<CommandPayload>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_mime(mut self, message: MimeMessage) -> Self {
        self.payload = Some(CommandPayload::Mime(message));
        self
    }

    pub fn with_raw_payload(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(CommandPayload::Raw(RawPayload::new(bytes)));
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn set_transaction(&mut self, transaction: TransactionId) {
        self.transaction = Some(transaction);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `name` matches this command
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Arguments after the name and transaction id, without the payload length
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn require_arg(&self, index: usize) -> Result<&str> {
        self.arg(index)
            .ok_or_else(|| MsnpError::missing_argument(self.name.clone(), index))
    }

    pub fn payload(&self) -> Option<&CommandPayload> {
        self.payload.as_ref()
    }

    pub fn mime(&self) -> Option<&MimeMessage> {
        match &self.payload {
            Some(CommandPayload::Mime(message)) => Some(message),
            _ => None,
        }
    }

    pub fn raw_payload(&self) -> Option<&[u8]> {
        match &self.payload {
            Some(CommandPayload::Raw(raw)) => Some(raw.as_bytes()),
            _ => None,
        }
    }

    /// Take ownership of the MIME payload, if any
    pub fn into_mime(self) -> Option<MimeMessage> {
        match self.payload {
            Some(CommandPayload::Mime(message)) => Some(message),
            _ => None,
        }
    }

    /// Whether this command gets a transaction id when sent
    pub fn requires_transaction(&self) -> bool {
        !UNNUMBERED_OUTBOUND.contains(&self.name.as_str())
    }

    fn render_line(&self, payload_len: Option<usize>) -> String {
        let mut line = self.name.clone();
        if let Some(transaction) = self.transaction {
            line.push(' ');
            line.push_str(&transaction.to_string());
        }
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(len) = payload_len {
            line.push(' ');
            line.push_str(&len.to_string());
        }
        line.push_str("\r\n");
        line
    }
}

impl Envelope for Command {
    fn encode(&self) -> Result<Vec<u8>> {
        let payload = match &self.payload {
            Some(payload) => Some(payload.as_envelope().encode()?),
            None => None,
        };
        let line = self.render_line(payload.as_ref().map(Vec::len));
        let mut bytes = line.into_bytes();
        if let Some(payload) = payload {
            bytes.extend_from_slice(&payload);
        }
        Ok(bytes)
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        let parsed = match parse_frame(bytes)? {
            ParsedFrame::Command { line, payload } => (line, payload),
            ParsedFrame::Error(error) => {
                return Err(WireError::UnexpectedErrorCode { code: error.code }.into())
            }
        };
        let (line, payload_bytes) = parsed;
        self.name = line.name;
        self.transaction = line.transaction;
        self.args = line.args;

        match (payload_bytes, line.payload_kind) {
            (Some(bytes), kind) => {
                // An attached payload of the matching kind keeps its inner chain
                let reuse = matches!(
                    (&self.payload, kind),
                    (Some(CommandPayload::Mime(_)), PayloadKind::Mime)
                        | (Some(CommandPayload::Raw(_)), PayloadKind::Raw)
                );
                if !reuse {
                    self.payload = Some(match kind {
                        PayloadKind::Mime => CommandPayload::Mime(MimeMessage::default()),
                        _ => CommandPayload::Raw(RawPayload::default()),
                    });
                }
                if let Some(payload) = self.payload.as_mut() {
                    payload.as_envelope_mut().decode(bytes)?;
                }
            }
            (None, _) => self.payload = None,
        }
        Ok(())
    }

    fn inner(&self) -> Option<&dyn Envelope> {
        self.payload.as_ref().map(CommandPayload::as_envelope)
    }

    fn describe(&self) -> String {
        let payload_len = self
            .payload
            .as_ref()
            .and_then(|payload| payload.as_envelope().encode().ok())
            .map(|bytes| bytes.len());
        self.render_line(payload_len)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe().trim_end())
    }
}

// ----------------------------------------------------------------------------
// Inbound Frames
// ----------------------------------------------------------------------------

/// Numeric error reply (`913 5`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolErrorCode {
    pub code: u16,
    pub transaction: Option<TransactionId>,
}

/// One decoded inbound frame
#[derive(Debug)]
pub enum Inbound {
    Command(Command),
    Error(ProtocolErrorCode),
}

impl Inbound {
    /// Parse exactly one frame
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if let ParsedFrame::Error(error) = parse_frame(bytes)? {
            return Ok(Inbound::Error(error));
        }
        let mut command = Command::default();
        command.decode(bytes)?;
        Ok(Inbound::Command(command))
    }
}

struct ParsedLine {
    name: String,
    transaction: Option<TransactionId>,
    args: CommandArgs,
    payload_kind: PayloadKind,
}

enum ParsedFrame<'a> {
    Command {
        line: ParsedLine,
        payload: Option<&'a [u8]>,
    },
    Error(ProtocolErrorCode),
}

fn parse_frame(bytes: &[u8]) -> Result<ParsedFrame<'_>> {
    // 1. Command line
    let line_end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(WireError::MissingTerminator)?;
    let rest = &bytes[line_end + 1..];
    let line = core::str::from_utf8(&bytes[..line_end]).map_err(|_| WireError::InvalidUtf8)?;
    let line = line.trim_end_matches('\r');
    let tokens = tokenize(line);
    let name = *tokens.first().ok_or(WireError::EmptyLine)?;

    // 2. Numeric error replies
    if is_error_code(name) {
        let code = name.parse::<u16>().map_err(|_| WireError::InvalidErrorCode {
            value: name.to_string(),
        })?;
        let transaction = tokens
            .get(1)
            .and_then(|token| token.parse::<u32>().ok())
            .map(TransactionId::new);
        return Ok(ParsedFrame::Error(ProtocolErrorCode { code, transaction }));
    }

    // 3. Transaction id
    let command_layout = layout(name);
    let mut next = 1;
    let transaction = if command_layout.has_transaction {
        let token = tokens
            .get(1)
            .ok_or_else(|| MsnpError::missing_argument(name, 0))?;
        next = 2;
        Some(TransactionId::new(token.parse::<u32>().map_err(|_| {
            WireError::InvalidTransaction {
                command: name.to_string(),
                value: token.to_string(),
            }
        })?))
    } else {
        None
    };

    // 4. Payload length and payload
    let declared = declared_payload_length(&tokens)?;
    let arg_end = if declared.is_some() {
        tokens.len() - 1
    } else {
        tokens.len()
    };
    let payload = match declared {
        Some(len) => {
            if rest.len() != len {
                return Err(WireError::PayloadLengthMismatch {
                    declared: len,
                    actual: rest.len(),
                }
                .into());
            }
            Some(rest)
        }
        None => None,
    };

    let args = tokens[next.min(arg_end)..arg_end]
        .iter()
        .map(|token| token.to_string())
        .collect();

    Ok(ParsedFrame::Command {
        line: ParsedLine {
            name: name.to_string(),
            transaction,
            args,
            payload_kind: if payload.is_some() {
                command_layout.payload
            } else {
                PayloadKind::None
            },
        },
        payload,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
