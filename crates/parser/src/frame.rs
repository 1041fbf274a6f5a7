//! Decoding of a single tool-call frame.
//!
//! Grammar, with the sentinel and terminator already stripped:
//!
//! ```text
//! frame   = id ":" name ":" payload
//! payload = base64( json-object )      ; may itself be split on ":"
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use patchwright_core::error::ParseError;
use patchwright_core::tool::ToolCallRequest;

/// Decode one frame body into a tool call. Malformed frames are rejected,
/// never repaired.
pub fn decode_frame(frame: &str) -> Result<ToolCallRequest, ParseError> {
    let frame = frame.trim_end_matches('\r');
    let fields: Vec<&str> = frame.split(':').collect();
    if fields.len() < 3 {
        return Err(ParseError::MissingFields {
            found: fields.len(),
        });
    }

    let id = fields[0].trim();
    if id.is_empty() {
        return Err(ParseError::EmptyId);
    }
    let name = fields[1].trim();
    if name.is_empty() {
        return Err(ParseError::EmptyName { id: id.into() });
    }

    let payload = fields[2..].join(":");
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ParseError::InvalidBase64 {
            id: id.into(),
            reason: e.to_string(),
        })?;

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| ParseError::InvalidJson {
            id: id.into(),
            reason: e.to_string(),
        })?;

    match value {
        serde_json::Value::Object(input) => Ok(ToolCallRequest::new(id, name, input)),
        _ => Err(ParseError::NotAnObject { id: id.into() }),
    }
}

/// Encode a call as a frame body (without sentinel or terminator).
pub fn encode_frame(call: &ToolCallRequest) -> String {
    let json = serde_json::Value::Object(call.input.clone()).to_string();
    format!("{}:{}:{}", call.id, call.name, STANDARD.encode(json))
}
