//! Streaming tool-call parser.
//!
//! The model interleaves narration with tool calls framed as
//!
//! ```text
//! TOOL_CALL:<id>:<name>:<base64(JSON object)>\n
//! ```
//!
//! Fragments arrive in arbitrary pieces, so a frame may be split anywhere,
//! including inside the sentinel itself. [`StreamParser`] buffers from the
//! sentinel onward until the terminator arrives and holds back any trailing
//! text that could still turn into a sentinel. Parsing a stream in pieces
//! yields the same text and calls as parsing it whole.
//!
//! A malformed frame drops only that call: its text is stripped, a
//! [`ParseError`] is reported and the stream continues. [`StreamParser::flush`]
//! must be called at end of stream; it resolves a still-buffered frame that
//! never got its terminator on a best-effort basis, the one place where an
//! incomplete frame is accepted.

pub mod frame;

use patchwright_core::error::ParseError;
use patchwright_core::tool::ToolCallRequest;
use tracing::{debug, warn};

pub use frame::{decode_frame, encode_frame};

/// Marks the start of a tool-call frame.
pub const SENTINEL: &str = "TOOL_CALL:";

/// Ends a tool-call frame.
pub const TERMINATOR: char = '\n';

/// What one fragment produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedChunk {
    /// Narration to show, with frames removed
    pub text: String,
    /// Calls completed by this fragment, in stream order
    pub calls: Vec<ToolCallRequest>,
    /// Frames dropped by this fragment
    pub errors: Vec<ParseError>,
}

impl ParsedChunk {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.calls.is_empty() && self.errors.is_empty()
    }

    fn merge(&mut self, other: ParsedChunk) {
        self.text.push_str(&other.text);
        self.calls.extend(other.calls);
        self.errors.extend(other.errors);
    }
}

/// Stateful per-stream parser. One instance per model stream.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything is held back waiting for more input.
    pub fn is_buffering(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Consume one fragment.
    pub fn feed(&mut self, fragment: &str) -> ParsedChunk {
        let mut input = std::mem::take(&mut self.buffer);
        input.push_str(fragment);

        let mut out = ParsedChunk::default();
        let mut rest = input.as_str();
        loop {
            let Some(start) = rest.find(SENTINEL) else {
                let keep = partial_sentinel_len(rest);
                let split = rest.len() - keep;
                out.text.push_str(&rest[..split]);
                self.buffer = rest[split..].to_string();
                return out;
            };

            out.text.push_str(&rest[..start]);
            let body = &rest[start + SENTINEL.len()..];
            let Some(end) = body.find(TERMINATOR) else {
                debug!(buffered = body.len(), "Buffering incomplete tool call");
                self.buffer = rest[start..].to_string();
                return out;
            };

            resolve(&body[..end], &mut out);
            rest = &body[end + TERMINATOR.len_utf8()..];
        }
    }

    /// End of stream: resolve whatever is still buffered.
    ///
    /// An unterminated frame is decoded as if its terminator had arrived;
    /// if that fails it is dropped like any malformed frame. Held-back text
    /// that never became a sentinel is returned as narration.
    pub fn flush(&mut self) -> ParsedChunk {
        let buffered = std::mem::take(&mut self.buffer);
        let mut out = ParsedChunk::default();
        match buffered.strip_prefix(SENTINEL) {
            Some(body) => {
                debug!("Flushing unterminated tool call");
                resolve(body.trim_end(), &mut out);
            }
            None => out.text = buffered,
        }
        out
    }

    /// Feed every fragment then flush; convenience for complete transcripts.
    pub fn parse_all<'a>(fragments: impl IntoIterator<Item = &'a str>) -> ParsedChunk {
        let mut parser = Self::new();
        let mut out = ParsedChunk::default();
        for fragment in fragments {
            out.merge(parser.feed(fragment));
        }
        out.merge(parser.flush());
        out
    }
}

fn resolve(frame: &str, out: &mut ParsedChunk) {
    match decode_frame(frame) {
        Ok(call) => {
            debug!(call_id = %call.id, tool = %call.name, "Decoded tool call");
            out.calls.push(call);
        }
        Err(e) => {
            warn!(error = %e, "Dropping malformed tool call");
            out.errors.push(e);
        }
    }
}

/// Length of the longest proper prefix of [`SENTINEL`] that `text` ends with.
fn partial_sentinel_len(text: &str) -> usize {
    (1..SENTINEL.len())
        .rev()
        .find(|&k| text.ends_with(&SENTINEL[..k]))
        .unwrap_or(0)
}
