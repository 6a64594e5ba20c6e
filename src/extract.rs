//! Content extraction — pulls the base64-encoded chat record out of a
//! message body, falling back to the raw text when decoding fails.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

/// Literal marker preceding the encoded payload in the body.
pub const PAYLOAD_MARKER: &str = "base64";

/// MIME-style boundary marker terminating the payload.
pub const BOUNDARY_MARKER: &str = "--";

/// Extract the chat content from a message's body sections.
///
/// All sections are walked in order and the last readable one wins,
/// regardless of how many sections the message carries. Returns `None`
/// when the message has no readable section at all; the caller is
/// expected to skip the message.
pub fn extract(sections: &[Vec<u8>]) -> Option<String> {
    let mut content = None;
    for section in sections {
        content = Some(decode_section(section));
    }
    content
}

/// Decode one body section.
///
/// Takes everything after the first `base64` marker and before the first
/// `--` boundary, strips whitespace and line breaks, and base64-decodes
/// it. Any failure falls back to the raw section text.
pub fn decode_section(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);

    let Some((_, after_marker)) = text.split_once(PAYLOAD_MARKER) else {
        debug!("no base64 marker in body section, using raw text");
        return text.into_owned();
    };

    let encoded = after_marker
        .split(BOUNDARY_MARKER)
        .next()
        .unwrap_or(after_marker)
        .trim();
    let encoded: String = encoded.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();

    match STANDARD.decode(encoded.as_bytes()) {
        Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
        Err(e) => {
            warn!("failed to decode base64 payload: {e}; using raw text");
            text.into_owned()
        }
    }
}
