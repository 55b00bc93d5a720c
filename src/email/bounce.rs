//! VERP envelope sender derivation.
//!
//! Every outbound message gets a unique reverse path whose local part is the
//! base64 encoded message id left part. A bounce processor that receives a
//! non-delivery report decodes the local part and, knowing the process-wide
//! id right part, rebuilds the originating [`MessageId`].

use crate::email::{EmailError, EmailResult, MessageId};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Derive the bounce address for a message
pub fn envelope_address(message_id: &MessageId, bounce_domain: &str) -> String {
    format!(
        "{}@{}",
        STANDARD.encode(message_id.id_left().as_bytes()),
        bounce_domain
    )
}

/// Recover the originating message id from a bounce address
pub fn correlate(address: &str, id_right: &str) -> EmailResult<MessageId> {
    let fail = |reason: String| EmailError::Format {
        value: address.to_string(),
        reason,
    };

    let trimmed = address.trim().trim_start_matches('<').trim_end_matches('>');
    let (local_part, _domain) = trimmed
        .rsplit_once('@')
        .ok_or_else(|| fail("missing '@' separator".to_string()))?;

    let bytes = STANDARD
        .decode(local_part)
        .map_err(|e| fail(format!("local part is not base64: {}", e)))?;
    let id_left =
        String::from_utf8(bytes).map_err(|e| fail(format!("local part is not UTF-8: {}", e)))?;

    Ok(MessageId::from_parts(id_left, id_right))
}
