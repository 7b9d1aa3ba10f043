//! Pull-based decoding of streamed generation responses.
//!
//! The backend streams newline-delimited JSON objects, each carrying a text
//! fragment and a `done` flag. [`TokenStream`] wraps the raw byte stream and
//! yields decoded fragments one at a time; nothing is pulled from the wire
//! until the caller asks. Undecodable lines are skipped up to a configured
//! budget, after which the stream fails rather than silently dropping text.

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::warn;

use crate::error::{GenerationErrorKind, RagError, Result};

#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Incremental text fragments from one generation call.
///
/// Network reads land in a raw byte buffer and are only decoded once a
/// complete line is present, so a multi-byte character split across two
/// reads never counts as a decode failure.
pub struct TokenStream {
    source: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    buffer: BytesMut,
    pending: VecDeque<String>,
    decode_failures: u32,
    max_decode_failures: u32,
    done: bool,
}

impl TokenStream {
    pub(crate) fn new(
        source: BoxStream<'static, reqwest::Result<Bytes>>,
        max_decode_failures: u32,
    ) -> Self {
        TokenStream {
            source: Some(source),
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            decode_failures: 0,
            max_decode_failures,
            done: false,
        }
    }

    /// Stream that yields `fragments` then finishes, for tests and stubs.
    pub fn from_fragments(fragments: Vec<String>) -> Self {
        TokenStream {
            source: None,
            buffer: BytesMut::new(),
            pending: fragments.into(),
            decode_failures: 0,
            max_decode_failures: 0,
            done: true,
        }
    }

    /// Next text fragment, `None` once the backend reports completion or
    /// the connection closes. After `close` this always returns `None`.
    pub async fn next(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Some(Ok(fragment));
            }
            if self.done {
                return None;
            }

            let source = self.source.as_mut()?;
            match source.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    if let Err(e) = self.drain_buffer() {
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    self.source = None;
                    return Some(Err(RagError::from_transport("generation stream", e)));
                }
                None => {
                    // Connection closed without a done marker; flush what
                    // remains and finish.
                    self.done = true;
                    self.source = None;
                    let leftover = std::mem::take(&mut self.buffer);
                    if let Ok(text) = std::str::from_utf8(&leftover) {
                        let line = text.trim();
                        if !line.is_empty() {
                            if let Ok(parsed) = serde_json::from_str::<StreamLine>(line) {
                                if !parsed.response.is_empty() {
                                    self.pending.push_back(parsed.response);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn drain_buffer(&mut self) -> Result<()> {
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let line = match std::str::from_utf8(&raw) {
                Ok(text) => text.trim(),
                Err(_) => {
                    self.record_decode_failure("invalid utf-8 in stream line")?;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamLine>(line) {
                Ok(parsed) => {
                    if !parsed.response.is_empty() {
                        self.pending.push_back(parsed.response);
                    }
                    if parsed.done {
                        self.done = true;
                        self.source = None;
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.record_decode_failure(&format!("undecodable stream line: {e}"))?;
                }
            }
        }
        Ok(())
    }

    fn record_decode_failure(&mut self, detail: &str) -> Result<()> {
        self.decode_failures += 1;
        warn!(
            failures = self.decode_failures,
            budget = self.max_decode_failures,
            detail,
            "skipping undecodable stream data"
        );
        if self.decode_failures > self.max_decode_failures {
            self.done = true;
            self.source = None;
            return Err(RagError::generation(
                GenerationErrorKind::InvalidResponse,
                format!("stream decode failure budget exhausted: {detail}"),
            ));
        }
        Ok(())
    }

    /// Abandon the stream. The underlying connection is dropped; any
    /// undelivered fragments are discarded.
    pub fn close(&mut self) {
        self.done = true;
        self.source = None;
        self.pending.clear();
        self.buffer.clear();
    }

    /// Drain the whole stream into one string.
    pub async fn collect_text(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(fragment) = self.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}
