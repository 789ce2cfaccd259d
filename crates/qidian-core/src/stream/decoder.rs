//! Line reassembly and event parsing for streamed answers.
//!
//! The transport hands us byte chunks with no alignment to lines, JSON tokens
//! or even UTF-8 characters. [`FrameDecoder`] keeps two pieces of carry-over
//! state between chunks (undecoded trailing bytes and the incomplete trailing
//! line), so the events it yields depend only on the byte stream and never on
//! how that stream was split.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::event::StreamEvent;

/// Prefix of a payload line in field-framed responses.
pub const DATA_PREFIX: &str = "data:";
/// Prefix of an event-name line in field-framed responses.
pub const EVENT_PREFIX: &str = "event:";
/// Lines starting with this marker are comments (keep-alives).
pub const COMMENT_MARKER: char = ':';
/// Payload value that terminates a field-framed stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const PREVIEW_CHARS: usize = 80;

/// Wire framing of a streaming endpoint. Chosen by the caller, never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// One JSON object per line (`application/x-ndjson`).
    #[default]
    LineJson,
    /// `data:`-prefixed records (`text/event-stream`).
    FieldFramed,
}

impl Framing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framing::LineJson => "line-json",
            Framing::FieldFramed => "field-framed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "line-json" | "ndjson" | "json" => Some(Framing::LineJson),
            "field-framed" | "sse" => Some(Framing::FieldFramed),
            _ => None,
        }
    }

    pub fn all() -> Vec<Framing> {
        vec![Framing::LineJson, Framing::FieldFramed]
    }
}

/// Incremental UTF-8 decoding that holds back an incomplete trailing
/// multibyte sequence until the rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as is complete. Invalid sequences
    /// become U+FFFD, exactly as a one-shot lossy decode would produce.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut input = self.pending.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - input.len();
        self.pending.drain(..consumed);
        out
    }

    /// Number of bytes held back.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any held-back bytes, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let held = self.pending.len();
        self.pending.clear();
        held
    }
}

enum Line {
    Event(StreamEvent),
    Skip,
    Malformed(serde_json::Error),
}

/// Reassembles chunks into lines and lines into [`StreamEvent`]s.
///
/// One decoder per stream. After `Done` (or the field-framed sentinel) the
/// decoder is finished and ignores further input.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    utf8: Utf8Carry,
    carry: String,
    finished: bool,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            utf8: Utf8Carry::new(),
            carry: String::new(),
            finished: false,
            discarded: 0,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feed one raw chunk, returning the events completed by it (possibly none).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let text = self.utf8.decode(chunk);
        self.carry.push_str(&text);

        let buffer = std::mem::take(&mut self.carry);
        let mut rest = buffer.as_str();
        while let Some(pos) = rest.find('\n') {
            let raw = &rest[..pos];
            rest = &rest[pos + 1..];
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            match parse_line(self.framing, line) {
                Line::Event(event) => {
                    let done = event == StreamEvent::Done;
                    events.push(event);
                    if done {
                        self.finish();
                        return events;
                    }
                }
                Line::Skip => {}
                Line::Malformed(err) => {
                    self.discarded += 1;
                    warn!(
                        framing = self.framing.as_str(),
                        error = %err,
                        line = %preview(line),
                        "discarding malformed stream line"
                    );
                }
            }
        }
        self.carry = rest.to_string();

        events
    }

    /// Called at end of input. Whatever is still carried over is an
    /// incomplete line and is dropped; returns the number of bytes dropped.
    pub fn finalize(&mut self) -> usize {
        let residual = self.carry.len() + self.utf8.clear();
        if residual > 0 {
            debug!(bytes = residual, "dropping incomplete trailing line at end of stream");
        }
        self.carry.clear();
        self.finished = true;
        residual
    }

    /// True once `Done` was seen or the input was finalized.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Count of lines dropped because they failed to parse.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn finish(&mut self) {
        self.finished = true;
        self.carry.clear();
        self.utf8.clear();
    }
}

fn parse_line(framing: Framing, line: &str) -> Line {
    if line.trim().is_empty() {
        return Line::Skip;
    }

    let payload = match framing {
        Framing::LineJson => line,
        Framing::FieldFramed => {
            if line.starts_with(COMMENT_MARKER) || line.starts_with(EVENT_PREFIX) {
                return Line::Skip;
            }
            let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                // id:, retry: and unknown fields carry nothing for us
                return Line::Skip;
            };
            let data = data.strip_prefix(' ').unwrap_or(data);
            if data.trim() == DONE_SENTINEL {
                return Line::Event(StreamEvent::Done);
            }
            data
        }
    };

    match StreamEvent::from_json(payload) {
        Ok(event) => Line::Event(event),
        Err(err) => Line::Malformed(err),
    }
}

fn preview(line: &str) -> String {
    let mut chars = line.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
