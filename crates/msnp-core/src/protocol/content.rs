//! Typed message content
//!
//! Classification of fully reassembled MIME messages into content events, and
//! rendering of outbound payloads into MIME messages.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::errors::WireError;
use crate::protocol::mime::{MimeMessage, HEADER_IM_FORMAT, HEADER_TYPING_USER};
use crate::types::{decode_display_name, encode_display_name, Account, Owner};
use crate::Result;

// ----------------------------------------------------------------------------
// Content Types
// ----------------------------------------------------------------------------

pub const CONTENT_TEXT: &str = "text/plain";
pub const CONTENT_TEXT_UTF8: &str = "text/plain; charset=UTF-8";
pub const CONTENT_CONTROL: &str = "text/x-msmsgscontrol";
pub const CONTENT_EMOTICON: &str = "text/x-mms-emoticon";
pub const CONTENT_ANIMATED_EMOTICON: &str = "text/x-mms-animemoticon";
pub const CONTENT_DATACAST: &str = "text/x-msnmsgr-datacast";
pub const CONTENT_P2P: &str = "application/x-msnmsgrp2p";
pub const CONTENT_INK: &str = "image/gif";

/// Datacast identifiers carried in the `ID:` body field
pub const DATACAST_NUDGE: u32 = 1;
pub const DATACAST_WINK: u32 = 2;
pub const DATACAST_VOICE_CLIP: u32 = 3;
pub const DATACAST_ACTION: u32 = 4;

// ----------------------------------------------------------------------------
// Text Format
// ----------------------------------------------------------------------------

/// Font settings carried in `X-MMS-IM-Format`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFormat {
    pub font_name: String,
    /// Effects, any combination of `B`, `I`, `U` and `S`
    pub effects: String,
    /// Colour as `BBGGRR` hex
    pub color: String,
    pub charset: String,
    pub pitch_family: String,
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            font_name: "Segoe UI".to_string(),
            effects: String::new(),
            color: "0".to_string(),
            charset: "1".to_string(),
            pitch_family: "0".to_string(),
        }
    }
}

impl TextFormat {
    /// Parse `FN=Arial; EF=B; CO=ff; CS=0; PF=22`; unknown keys are ignored
    pub fn parse(value: &str) -> Self {
        let mut format = Self {
            font_name: String::new(),
            effects: String::new(),
            color: String::new(),
            charset: String::new(),
            pitch_family: String::new(),
        };
        for field in value.split(';') {
            let Some((key, val)) = field.trim().split_once('=') else {
                continue;
            };
            let val = val.trim();
            match key.trim() {
                "FN" => format.font_name = decode_display_name(val),
                "EF" => format.effects = val.to_string(),
                "CO" => format.color = val.to_string(),
                "CS" => format.charset = val.to_string(),
                "PF" => format.pitch_family = val.to_string(),
                _ => {}
            }
        }
        format
    }

    pub fn render(&self) -> String {
        format!(
            "FN={}; EF={}; CO={}; CS={}; PF={}",
            encode_display_name(&self.font_name),
            self.effects,
            self.color,
            self.charset,
            self.pitch_family
        )
    }
}

// ----------------------------------------------------------------------------
// Text Message
// ----------------------------------------------------------------------------

/// Plain text message body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
    pub format: Option<TextFormat>,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Wire size of the body in bytes
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    /// Build the `text/plain` MIME message carrying this text
    pub fn to_mime(&self) -> Result<MimeMessage> {
        let mut message = MimeMessage::new(CONTENT_TEXT_UTF8);
        if let Some(format) = &self.format {
            message = message.with_header(HEADER_IM_FORMAT, format.render());
        }
        message.with_inner(Box::new(self.clone()))
    }
}

impl Envelope for TextMessage {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.text.as_bytes().to_vec())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        self.text = String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.text.clone()
    }
}

// ----------------------------------------------------------------------------
// Emoticons
// ----------------------------------------------------------------------------

/// Custom emoticon announced before it is used in text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoticonDefinition {
    pub shortcut: String,
    /// Serialized object descriptor used to fetch the image
    pub object: String,
    pub animated: bool,
}

fn parse_emoticons(body: &str, animated: bool) -> Vec<EmoticonDefinition> {
    let fields: Vec<&str> = body
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .collect();
    fields
        .chunks(2)
        .filter_map(|pair| match pair {
            [shortcut, object] if !shortcut.is_empty() && !object.is_empty() => {
                Some(EmoticonDefinition {
                    shortcut: shortcut.to_string(),
                    object: object.to_string(),
                    animated,
                })
            }
            _ => None,
        })
        .collect()
}

fn render_emoticons(definitions: &[EmoticonDefinition]) -> String {
    let mut body = String::new();
    for definition in definitions {
        body.push_str(&definition.shortcut);
        body.push('\t');
        body.push_str(&definition.object);
        body.push('\t');
    }
    body
}

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

/// Typed content of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(TextMessage),
    Typing { account: Account },
    Nudge,
    Wink { data: String },
    Emoticons(Vec<EmoticonDefinition>),
}

/// Whether a message belongs to the peer-to-peer sub-protocol
pub fn is_p2p(message: &MimeMessage) -> bool {
    message.content_type().as_deref() == Some(CONTENT_P2P)
}

/// Classify a reassembled message by its content type.
///
/// Returns `None` for content types this layer does not surface.
pub fn classify(message: &MimeMessage) -> Option<MessageContent> {
    let content_type = message.content_type()?;
    match content_type.as_str() {
        CONTENT_CONTROL => {
            let account = Account::new(message.header(HEADER_TYPING_USER)?).ok()?;
            Some(MessageContent::Typing { account })
        }
        CONTENT_EMOTICON | CONTENT_ANIMATED_EMOTICON => {
            let definitions = parse_emoticons(
                &message.body_text(),
                content_type == CONTENT_ANIMATED_EMOTICON,
            );
            (!definitions.is_empty()).then_some(MessageContent::Emoticons(definitions))
        }
        CONTENT_DATACAST => {
            let fields = datacast_fields(&message.body_text());
            let id = fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("ID"))
                .and_then(|(_, value)| value.parse::<u32>().ok())?;
            match id {
                DATACAST_NUDGE => Some(MessageContent::Nudge),
                DATACAST_WINK => {
                    let data = fields
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case("Data"))
                        .map(|(_, value)| value.clone())
                        .unwrap_or_default();
                    Some(MessageContent::Wink { data })
                }
                _ => None,
            }
        }
        other if other.starts_with(CONTENT_TEXT) => {
            let mut text = TextMessage::default();
            text.decode(message.body()).ok()?;
            text.format = message.header(HEADER_IM_FORMAT).map(TextFormat::parse);
            Some(MessageContent::Text(text))
        }
        _ => None,
    }
}

fn datacast_fields(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

// ----------------------------------------------------------------------------
// Outbound Payloads
// ----------------------------------------------------------------------------

/// Payload a caller asks to deliver to a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(TextMessage),
    Typing,
    Nudge,
    Wink { data: String },
    Emoticons(Vec<EmoticonDefinition>),
    /// Handwritten ink, base64 GIF data
    Ink { data: String },
}

impl OutboundPayload {
    /// Short name used in logs and routing errors
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundPayload::Text(_) => "text",
            OutboundPayload::Typing => "typing",
            OutboundPayload::Nudge => "nudge",
            OutboundPayload::Wink { .. } => "wink",
            OutboundPayload::Emoticons(_) => "emoticon",
            OutboundPayload::Ink { .. } => "ink",
        }
    }

    /// Acknowledgement mode for the `MSG` command
    pub fn ack_mode(&self) -> &'static str {
        match self {
            OutboundPayload::Typing => "U",
            _ => "N",
        }
    }

    /// Render as the MIME message sent on a switchboard
    pub fn to_mime(&self, owner: &Owner) -> Result<MimeMessage> {
        match self {
            OutboundPayload::Text(text) => text.to_mime(),
            OutboundPayload::Typing => Ok(MimeMessage::new(CONTENT_CONTROL)
                .with_header(HEADER_TYPING_USER, owner.account.as_str())
                .with_body(b"\r\n".to_vec())),
            OutboundPayload::Nudge => Ok(MimeMessage::new(CONTENT_DATACAST)
                .with_body(format!("ID: {}\r\n\r\n", DATACAST_NUDGE).into_bytes())),
            OutboundPayload::Wink { data } => Ok(MimeMessage::new(CONTENT_DATACAST).with_body(
                format!("ID: {}\r\nData: {}\r\n\r\n", DATACAST_WINK, data).into_bytes(),
            )),
            OutboundPayload::Emoticons(definitions) => {
                let animated = definitions.iter().any(|definition| definition.animated);
                let content_type = if animated {
                    CONTENT_ANIMATED_EMOTICON
                } else {
                    CONTENT_EMOTICON
                };
                Ok(MimeMessage::new(content_type)
                    .with_body(render_emoticons(definitions).into_bytes()))
            }
            OutboundPayload::Ink { data } => {
                Ok(MimeMessage::new(CONTENT_INK).with_body(format!("base64:{}", data).into_bytes()))
            }
        }
    }
}
