use crate::email::{EmailError, EmailResult};
use lettre::{message::Mailbox, Address};
use std::str::FromStr;

/// Parse a single mandatory email address or mailbox
///
/// Accepts `user@domain`, `<user@domain>` and `Name <user@domain>`, the name
/// optionally double quoted.
pub fn parse_one(address: &str) -> EmailResult<Mailbox> {
    let trimmed = address.trim();

    if trimmed.is_empty() {
        return Err(EmailError::address(address, "empty address"));
    }

    // Handle "Name <email@domain.com>" format
    if let Some(start) = trimmed.find('<') {
        let end = trimmed
            .rfind('>')
            .filter(|end| *end > start)
            .ok_or_else(|| EmailError::address(trimmed, "missing closing angle bracket"))?;
        if end != trimmed.len() - 1 {
            return Err(EmailError::address(
                trimmed,
                "unexpected text after closing angle bracket",
            ));
        }

        let name = trimmed[..start].trim().trim_matches('"').trim();
        let email = trimmed[start + 1..end].trim();
        let addr = Address::from_str(email).map_err(|e| EmailError::address(trimmed, e))?;

        let name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        return Ok(Mailbox::new(name, addr));
    }

    // Handle plain email address
    let addr = Address::from_str(trimmed).map_err(|e| EmailError::address(trimmed, e))?;
    Ok(Mailbox::new(None, addr))
}

/// Parse a comma-separated list of email addresses, preserving order
pub fn parse_list(addresses: &str) -> EmailResult<Vec<Mailbox>> {
    split_list(addresses).into_iter().map(parse_one).collect()
}

/// Strip a mailbox down to its bare address, rejecting display names
///
/// Envelope senders travel in the SMTP `MAIL FROM` command and cannot carry
/// personal data.
pub fn require_plain(mailbox: Mailbox) -> EmailResult<Address> {
    if mailbox.name.is_some() {
        return Err(EmailError::EnvelopeAddress(mailbox.to_string()));
    }
    Ok(mailbox.email)
}

/// Join mailboxes for display, e.g. in the development trace
pub fn join(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// Commas inside a quoted display name do not separate entries
fn split_list(joined: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (index, c) in joined.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&joined[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&joined[start..]);

    parts
}
