use crate::email::address::{parse_list, parse_one, require_plain};
use crate::email::{
    EmailError, EmailResult, EmailSender, MailFields, MessageId, Payload, SendReceipt,
};
use crate::template::TemplateRef;
use lettre::{message::Mailbox, Address};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Recipient classes of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientKind::To => write!(f, "to"),
            RecipientKind::Cc => write!(f, "cc"),
            RecipientKind::Bcc => write!(f, "bcc"),
        }
    }
}

/// One in-progress outbound message bound to a template
///
/// Setters validate and parse their argument and hand the draft back, so
/// calls chain with `?`. Sending consumes the draft: it renders the body
/// exactly once and hands the result to the sender for delivery.
pub struct EmailDraft {
    sender: EmailSender,
    pub(crate) template: TemplateRef,
    pub(crate) message_id: MessageId,
    pub(crate) subject: Option<String>,
    pub(crate) from: Option<Mailbox>,
    pub(crate) envelope_from: Option<Address>,
    pub(crate) reply_to: Option<Vec<Mailbox>>,
    pub(crate) recipients: HashMap<RecipientKind, Vec<Mailbox>>,
    pub(crate) content_type: Option<String>,
    pub(crate) body: Option<String>,
    pub(crate) attachments: Option<Vec<PathBuf>>,
}

impl EmailDraft {
    pub(crate) fn new(sender: EmailSender, template: TemplateRef, message_id: MessageId) -> Self {
        Self {
            sender,
            template,
            message_id,
            subject: None,
            from: None,
            envelope_from: None,
            reply_to: None,
            recipients: HashMap::new(),
            content_type: None,
            body: None,
            attachments: None,
        }
    }

    /// Set the sender
    pub fn from(mut self, address: &str) -> EmailResult<Self> {
        not_empty(address, "From address")?;
        self.from = Some(parse_one(address)?);
        Ok(self)
    }

    /// Set the envelope sender; must be a bare address without display name
    pub fn envelope_from(mut self, address: &str) -> EmailResult<Self> {
        not_empty(address, "Envelope from address")?;
        self.envelope_from = Some(require_plain(parse_one(address)?)?);
        Ok(self)
    }

    /// Set To recipients, replacing any previous ones
    pub fn to<I, S>(self, addresses: I) -> EmailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients_of(RecipientKind::To, "To addresses", addresses)
    }

    /// Set Cc recipients, replacing any previous ones
    pub fn cc<I, S>(self, addresses: I) -> EmailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients_of(RecipientKind::Cc, "CC addresses", addresses)
    }

    /// Set Bcc recipients, replacing any previous ones
    pub fn bcc<I, S>(self, addresses: I) -> EmailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients_of(RecipientKind::Bcc, "BCC addresses", addresses)
    }

    /// Set the subject
    pub fn subject(mut self, subject: &str) -> EmailResult<Self> {
        not_empty(subject, "Subject")?;
        self.subject = Some(subject.to_string());
        Ok(self)
    }

    /// Set addresses replies should go to
    pub fn reply_to<I, S>(mut self, addresses: I) -> EmailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = join_arguments(addresses);
        not_empty(&joined, "Reply to address")?;
        self.reply_to = Some(parse_list(&joined)?);
        Ok(self)
    }

    /// Set the body content type, e.g. `text/plain; charset=UTF-8`
    pub fn content_type(mut self, content_type: &str) -> EmailResult<Self> {
        not_empty(content_type, "Content type")?;
        self.content_type = Some(content_type.trim().to_string());
        Ok(self)
    }

    /// Attach files; the message becomes multipart
    pub fn attach<I, P>(mut self, files: I) -> EmailResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let files: Vec<PathBuf> = files.into_iter().map(Into::into).collect();
        if files.is_empty() {
            return Err(EmailError::Validation(
                "Attached files argument is empty".to_string(),
            ));
        }
        if let Some(missing) = files.iter().find(|file| !file.is_file()) {
            return Err(EmailError::Validation(format!(
                "Attached file |{}| does not exist",
                missing.display()
            )));
        }

        self.attachments = Some(files);
        Ok(self)
    }

    /// Apply every present field, through the regular setters
    pub fn set(mut self, fields: &MailFields) -> EmailResult<Self> {
        if let Some(subject) = &fields.subject {
            self = self.subject(subject)?;
        }
        if let Some(to) = &fields.to {
            self = self.to([to])?;
        }
        if let Some(cc) = &fields.cc {
            self = self.cc([cc])?;
        }
        if let Some(bcc) = &fields.bcc {
            self = self.bcc([bcc])?;
        }
        if let Some(from) = &fields.from {
            self = self.from(from)?;
        }
        if let Some(envelope_from) = &fields.envelope_from {
            self = self.envelope_from(envelope_from)?;
        }
        if let Some(reply_to) = &fields.reply_to {
            self = self.reply_to([reply_to])?;
        }
        if let Some(content_type) = &fields.content_type {
            self = self.content_type(content_type)?;
        }
        Ok(self)
    }

    /// Render the body and deliver the message
    ///
    /// Accepts at most one payload. A mail model payload first overwrites
    /// the draft fields it supplies, then its nested model is rendered.
    pub async fn send(mut self, args: Vec<Payload>) -> EmailResult<SendReceipt> {
        if args.len() > 1 {
            return Err(EmailError::TooManyArguments(args.len()));
        }

        let payload = args.into_iter().next().unwrap_or_default();
        let (fields, data) = payload.into_parts();
        if let Some(fields) = fields {
            self = self.set(&fields)?;
        }

        self.body = Some(self.sender.render(&self.template, &data)?);

        let sender = self.sender.clone();
        sender.dispatch(self).await
    }

    /// Send with a single payload
    pub async fn send_with(self, payload: Payload) -> EmailResult<SendReceipt> {
        self.send(vec![payload]).await
    }

    pub fn template_name(&self) -> &str {
        self.template.name()
    }

    pub fn template(&self) -> &TemplateRef {
        &self.template
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Explicitly set recipients of one class
    pub fn recipients(&self, kind: RecipientKind) -> Option<&[Mailbox]> {
        self.recipients.get(&kind).map(Vec::as_slice)
    }

    /// Rendered body, present once the draft has been sent
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn attachments(&self) -> Option<&[PathBuf]> {
        self.attachments.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    fn recipients_of<I, S>(
        mut self,
        kind: RecipientKind,
        label: &str,
        addresses: I,
    ) -> EmailResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = join_arguments(addresses);
        not_empty(&joined, label)?;
        self.recipients.insert(kind, parse_list(&joined)?);
        Ok(self)
    }
}

impl fmt::Debug for EmailDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailDraft")
            .field("template", &self.template.name())
            .field("message_id", &self.message_id.value())
            .field("subject", &self.subject)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

fn not_empty(value: &str, label: &str) -> EmailResult<()> {
    if value.trim().is_empty() {
        return Err(EmailError::Validation(format!(
            "{} argument is null or empty",
            label
        )));
    }
    Ok(())
}

fn join_arguments<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|value| value.as_ref().trim().to_string())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
