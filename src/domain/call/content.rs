//! Call content and streams
//!
//! Cellular audio is routed in hardware, so contents only carry enough
//! state to be listed; they never negotiate media.

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDisposition {
    /// Part of the call since it was created
    Initial,
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStream {
    path: String,
}

impl CallStream {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Sending direction cannot be changed on a hardware-routed stream
    pub fn set_sending(&mut self, _sending: bool) -> Result<()> {
        Err(CallError::NotImplemented(
            "RequestReceiving is not supported for cellular calls.".to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContent {
    name: String,
    path: String,
    disposition: ContentDisposition,
    streams: Vec<CallStream>,
}

impl CallContent {
    /// New content under `owner_path`; the name is escaped into the path
    pub fn new(owner_path: &str, name: &str, disposition: ContentDisposition) -> Self {
        Self {
            name: name.to_string(),
            path: format!("{}/Content_{}", owner_path, escape_identifier(name)),
            disposition,
            streams: Vec::new(),
        }
    }

    pub fn add_stream(&mut self) -> &mut CallStream {
        let path = format!("{}/Stream{}", self.path, self.streams.len());
        self.streams.push(CallStream { path });
        let last = self.streams.len() - 1;
        &mut self.streams[last]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn disposition(&self) -> ContentDisposition {
        self.disposition
    }

    pub fn streams(&self) -> &[CallStream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [CallStream] {
        &mut self.streams
    }
}

/// Escape `name` so it is usable as one object path element
fn escape_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }

    let mut escaped = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()) {
            escaped.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("_{:02x}", byte));
            }
        }
    }
    escaped
}
