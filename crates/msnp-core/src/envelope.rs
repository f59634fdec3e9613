//! Recursive message framing
//!
//! Every wire unit is an [`Envelope`]: a command wraps a MIME message, which in
//! turn may own a text or control payload. Containers own their inner envelope;
//! there is no back-pointer to the outer envelope. Code that needs the outer
//! context receives it as a parameter instead.

use core::fmt;

use crate::Result;

// ----------------------------------------------------------------------------
// Envelope Trait
// ----------------------------------------------------------------------------

/// Encode/decode contract shared by every framing layer
pub trait Envelope: fmt::Debug + Send + Sync {
    /// Produce the wire bytes for this envelope and everything it owns
    fn encode(&self) -> Result<Vec<u8>>;

    /// Parse wire bytes into this envelope.
    ///
    /// Containers parse their own header first and then hand their payload
    /// bytes to the inner envelope, if one is attached.
    fn decode(&mut self, bytes: &[u8]) -> Result<()>;

    /// The envelope this one wraps
    fn inner(&self) -> Option<&dyn Envelope> {
        None
    }

    /// Textual rendering of this layer only
    fn describe(&self) -> String;

    /// Render this layer followed by every inner layer
    fn debug_string(&self) -> String {
        let mut rendered = self.describe();
        let mut next = self.inner();
        while let Some(envelope) = next {
            rendered.push_str(&envelope.describe());
            next = envelope.inner();
        }
        rendered
    }
}

// ----------------------------------------------------------------------------
// Raw Payload
// ----------------------------------------------------------------------------

/// Leaf envelope carrying opaque bytes (XML notifications, P2P data, ink)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPayload {
    bytes: Vec<u8>,
}

impl RawPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Envelope for RawPayload {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes = bytes.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("[{} bytes]\r\n", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Layer {
        label: &'static str,
        inner: Option<Box<dyn Envelope>>,
    }

    impl Envelope for Layer {
        fn encode(&self) -> Result<Vec<u8>> {
            let mut bytes = self.label.as_bytes().to_vec();
            if let Some(inner) = &self.inner {
                bytes.extend(inner.encode()?);
            }
            Ok(bytes)
        }

        fn decode(&mut self, bytes: &[u8]) -> Result<()> {
            let rest = &bytes[self.label.len()..];
            if let Some(inner) = self.inner.as_mut() {
                inner.decode(rest)?;
            }
            Ok(())
        }

        fn inner(&self) -> Option<&dyn Envelope> {
            self.inner.as_deref()
        }

        fn describe(&self) -> String {
            format!("{}|", self.label)
        }
    }

    #[test]
    fn test_debug_string_walks_chain() {
        let chain = Layer {
            label: "outer",
            inner: Some(Box::new(Layer {
                label: "middle",
                inner: Some(Box::new(RawPayload::new(b"abc".to_vec()))),
            })),
        };
        assert_eq!(chain.debug_string(), "outer|middle|[3 bytes]\r\n");
    }

    #[test]
    fn test_container_decode_reaches_leaf() {
        let mut chain = Layer {
            label: "head",
            inner: Some(Box::new(RawPayload::default())),
        };
        chain.decode(b"headpayload").unwrap();
        assert_eq!(chain.encode().unwrap(), b"headpayload".to_vec());
    }
}
