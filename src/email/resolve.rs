//! Field resolution.
//!
//! Every header walks a fixed chain and stops at the first present value:
//!
//! | field          | chain                                                             |
//! |----------------|-------------------------------------------------------------------|
//! | subject        | draft, sender default, template meta                              |
//! | from           | draft, sender default, template meta, session default             |
//! | envelope from  | draft, sender default, VERP bounce address, bare resolved `from`  |
//! | reply to       | draft, sender default, template meta, `[resolved from]`           |
//! | content type   | draft, sender default, template meta                              |
//! | to / cc / bcc  | draft, template meta                                              |
//!
//! Sender defaults are consulted before template metadata.

use crate::email::address::{self, parse_list, parse_one, require_plain};
use crate::email::{bounce, EmailDraft, EmailError, EmailResult, MessageId, RecipientKind};
use lettre::{message::Mailbox, Address};
use std::path::PathBuf;

/// Content type used when neither draft nor template declare one
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Process-level fallback values for unset draft fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SenderDefaults {
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Mailbox>,
    pub envelope_from: Option<Address>,
    pub reply_to: Option<Vec<Mailbox>>,
}

impl SenderDefaults {
    /// Defaults with only the standard content type set
    pub fn standard() -> Self {
        Self {
            content_type: Some(DEFAULT_CONTENT_TYPE.to_string()),
            ..Self::default()
        }
    }

    /// Build defaults from their textual configuration
    pub fn parse(
        content_type: Option<&str>,
        subject: Option<&str>,
        from: Option<&str>,
        envelope_from: Option<&str>,
        reply_to: Option<&str>,
    ) -> EmailResult<Self> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        Ok(Self {
            content_type: present(content_type).map(str::to_string),
            subject: present(subject).map(str::to_string),
            from: present(from).map(parse_one).transpose()?,
            envelope_from: present(envelope_from)
                .map(|value| parse_one(value).and_then(require_plain))
                .transpose()?,
            reply_to: present(reply_to).map(parse_list).transpose()?,
        })
    }
}

/// A message with every header decided, ready for assembly
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEmail {
    pub message_id: MessageId,
    pub from: Mailbox,
    pub envelope_from: Address,
    pub reply_to: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Option<Vec<Mailbox>>,
    pub bcc: Option<Vec<Mailbox>>,
    pub subject: String,
    pub content_type: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl ResolvedEmail {
    /// Envelope recipients: to, cc and bcc addresses
    pub fn recipients(&self) -> Vec<Address> {
        self.to
            .iter()
            .chain(self.cc.iter().flatten())
            .chain(self.bcc.iter().flatten())
            .map(|mailbox| mailbox.email.clone())
            .collect()
    }
}

/// Headers decided as far as the draft and default layers allow
///
/// Mandatory fields may still be missing. Development mode traces this view
/// as is; delivery goes through [`PartialEmail::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialEmail {
    pub message_id: MessageId,
    pub from: Option<Mailbox>,
    pub envelope_from: Option<Address>,
    pub reply_to: Option<Vec<Mailbox>>,
    pub to: Option<Vec<Mailbox>>,
    pub cc: Option<Vec<Mailbox>>,
    pub bcc: Option<Vec<Mailbox>>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub attachments: Vec<PathBuf>,
}

impl PartialEmail {
    pub fn recipients(&self) -> Vec<Address> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .flatten()
            .map(|mailbox| mailbox.email.clone())
            .collect()
    }

    /// Require every mandatory field
    pub fn complete(self) -> EmailResult<ResolvedEmail> {
        let subject = self
            .subject
            .ok_or(EmailError::MissingRequiredField("subject"))?;
        let from = self.from.ok_or(EmailError::MissingRequiredField("from"))?;
        let content_type = self
            .content_type
            .ok_or(EmailError::MissingRequiredField("content_type"))?;
        let to = self.to.ok_or(EmailError::MissingRequiredField("to"))?;
        let body = self.body.ok_or(EmailError::MissingRequiredField("body"))?;

        Ok(ResolvedEmail {
            message_id: self.message_id,
            envelope_from: self.envelope_from.unwrap_or_else(|| from.email.clone()),
            reply_to: self.reply_to.unwrap_or_else(|| vec![from.clone()]),
            from,
            to,
            cc: self.cc,
            bcc: self.bcc,
            subject,
            content_type,
            body,
            attachments: self.attachments,
        })
    }
}

impl From<ResolvedEmail> for PartialEmail {
    fn from(email: ResolvedEmail) -> Self {
        Self {
            message_id: email.message_id,
            from: Some(email.from),
            envelope_from: Some(email.envelope_from),
            reply_to: Some(email.reply_to),
            to: Some(email.to),
            cc: email.cc,
            bcc: email.bcc,
            subject: Some(email.subject),
            content_type: Some(email.content_type),
            body: Some(email.body),
            attachments: email.attachments,
        }
    }
}

/// Merges a draft with the default layers
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver<'a> {
    pub defaults: &'a SenderDefaults,
    pub session_from: Option<&'a Mailbox>,
    pub bounce_domain: Option<&'a str>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(defaults: &'a SenderDefaults) -> Self {
        Self {
            defaults,
            session_from: None,
            bounce_domain: None,
        }
    }

    pub fn with_session_from(mut self, session_from: Option<&'a Mailbox>) -> Self {
        self.session_from = session_from;
        self
    }

    pub fn with_bounce_domain(mut self, bounce_domain: Option<&'a str>) -> Self {
        self.bounce_domain = bounce_domain;
        self
    }

    /// Decide every header of a rendered draft, enforcing mandatory fields
    pub fn resolve(&self, draft: &EmailDraft) -> EmailResult<ResolvedEmail> {
        self.resolve_partial(draft)?.complete()
    }

    /// Walk every precedence chain without requiring any field
    pub fn resolve_partial(&self, draft: &EmailDraft) -> EmailResult<PartialEmail> {
        let meta = draft.template.metadata();

        let subject = draft
            .subject
            .clone()
            .or_else(|| self.defaults.subject.clone())
            .or_else(|| meta.subject.clone());

        let from = draft
            .from
            .clone()
            .or_else(|| self.defaults.from.clone())
            .or_else(|| meta.from.clone())
            .or_else(|| self.session_from.cloned());

        let envelope_from = match draft
            .envelope_from
            .clone()
            .or_else(|| self.defaults.envelope_from.clone())
        {
            Some(address) => Some(address),
            None => self.derive_envelope_from(&draft.message_id, from.as_ref())?,
        };

        let reply_to = draft
            .reply_to
            .clone()
            .or_else(|| self.defaults.reply_to.clone())
            .or_else(|| meta.reply_to.clone())
            .or_else(|| from.clone().map(|from| vec![from]));

        let content_type = draft
            .content_type
            .clone()
            .or_else(|| self.defaults.content_type.clone())
            .or_else(|| meta.content_type.clone());

        let recipients = |kind: RecipientKind, meta: &Option<Vec<Mailbox>>| {
            draft
                .recipients
                .get(&kind)
                .cloned()
                .or_else(|| meta.clone())
                .filter(|list| !list.is_empty())
        };

        Ok(PartialEmail {
            message_id: draft.message_id.clone(),
            from,
            envelope_from,
            reply_to,
            to: recipients(RecipientKind::To, &meta.to),
            cc: recipients(RecipientKind::Cc, &meta.cc),
            bcc: recipients(RecipientKind::Bcc, &meta.bcc),
            subject,
            content_type,
            body: draft.body.clone(),
            attachments: draft.attachments.clone().unwrap_or_default(),
        })
    }

    // VERP address when a bounce domain is configured, bare from otherwise
    fn derive_envelope_from(
        &self,
        message_id: &MessageId,
        from: Option<&Mailbox>,
    ) -> EmailResult<Option<Address>> {
        match self.bounce_domain {
            Some(domain) => {
                let verp = bounce::envelope_address(message_id, domain);
                verp.parse::<Address>()
                    .map(Some)
                    .map_err(|e| EmailError::address(verp, e))
            }
            None => Ok(from.map(|from| from.email.clone())),
        }
    }
}
/// Human readable summary used in logs
pub fn describe(resolved: &ResolvedEmail) -> String {
    format!(
        "{} -> {} |{}|",
        resolved.message_id,
        address::join(&resolved.to),
        resolved.subject
    )
}
