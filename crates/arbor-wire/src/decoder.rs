//! Incremental frame decoder for the push transport

use crate::{
    error::{Error, Result},
    stream::StreamEvent,
};

/// Marker that starts every event frame line
pub const FRAME_PREFIX: &str = "data:";

/// Splits incoming bytes on line boundaries and decodes each event frame.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network reads decode correctly. Lines without the
/// frame prefix (blank separators, `:` heartbeats, `event:` lines) are
/// ignored. A malformed frame is logged and skipped; it never ends the
/// stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl FrameDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_raw(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_raw(&rest).into_iter().collect()
    }

    /// Number of malformed frames skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_raw(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let line = String::from_utf8_lossy(raw);
        match decode_line(line.trim_end_matches(['\r', '\n'])) {
            Ok(event) => event,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!("Skipping transport frame: {}", e);
                None
            }
        }
    }
}

/// Decode a single line.
///
/// Returns `Ok(None)` for lines that are not frames and for frames whose
/// discriminant is not recognized.
pub fn decode_line(line: &str) -> Result<Option<StreamEvent>> {
    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }

    let event: StreamEvent =
        serde_json::from_str(payload).map_err(|source| Error::MalformedFrame {
            line: line.to_string(),
            source,
        })?;

    if event == StreamEvent::Unknown {
        tracing::trace!("Ignoring frame with unrecognized type: {}", payload);
        return Ok(None);
    }
    Ok(Some(event))
}
