//! RFC 2822 message identifier.
//!
//! The canonical form is `<id-left@id-right>`: `id-left` is a random token,
//! one per message, and `id-right` identifies the sending system. The same
//! `id-left` feeds the VERP envelope sender, see [`crate::email::bounce`].

use crate::email::{EmailError, EmailResult};
use std::fmt;
use std::str::FromStr;

/// Immutable two-part message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    id_left: String,
    id_right: String,
}

impl MessageId {
    /// Create a new identifier with a fresh random left part
    pub fn generate<S: Into<String>>(id_right: S) -> Self {
        Self {
            // 32 lowercase hex digits
            id_left: uuid::Uuid::new_v4().simple().to_string(),
            id_right: id_right.into(),
        }
    }

    /// Rebuild an identifier from known parts
    pub fn from_parts<L: Into<String>, R: Into<String>>(id_left: L, id_right: R) -> Self {
        Self {
            id_left: id_left.into(),
            id_right: id_right.into(),
        }
    }

    /// Parse a canonical `<id-left@id-right>` value
    pub fn parse(canonical: &str) -> EmailResult<Self> {
        let fail = |reason: &str| EmailError::Format {
            value: canonical.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = canonical.trim();
        let inner = trimmed
            .strip_prefix('<')
            .ok_or_else(|| fail("missing leading angular bracket"))?
            .strip_suffix('>')
            .ok_or_else(|| fail("missing trailing angular bracket"))?;

        let (id_left, id_right) = inner
            .split_once('@')
            .ok_or_else(|| fail("missing '@' separator"))?;
        if id_right.contains('@') {
            return Err(fail("more than one '@' separator"));
        }

        let id_left = id_left.trim();
        let id_right = id_right.trim();
        if id_left.is_empty() || id_right.is_empty() {
            return Err(fail("empty identifier part"));
        }

        Ok(Self::from_parts(id_left, id_right))
    }

    pub fn id_left(&self) -> &str {
        &self.id_left
    }

    pub fn id_right(&self) -> &str {
        &self.id_right
    }

    /// Canonical value as stamped into the `Message-ID` header
    pub fn value(&self) -> String {
        format!("<{}@{}>", self.id_left, self.id_right)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}@{}>", self.id_left, self.id_right)
    }
}

impl FromStr for MessageId {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check that a string can be used as identifier right part
pub fn is_valid_id_right(id_right: &str) -> bool {
    !id_right.is_empty()
        && !id_right
            .chars()
            .any(|c| c == '@' || c == '<' || c == '>' || c.is_whitespace())
}
