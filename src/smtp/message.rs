use crate::email::{EmailError, EmailResult, MessageId, ResolvedEmail};
use lettre::{
    address::Envelope,
    message::{header::ContentType, Attachment, MultiPart, SinglePart},
    Message,
};
use std::fs;
use std::path::Path;

/// A transport-ready message together with its identifier
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    message_id: MessageId,
    message: Message,
}

impl OutboundMessage {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// SMTP envelope: reverse path plus every recipient
    pub fn envelope(&self) -> &Envelope {
        self.message.envelope()
    }

    /// RFC 5322 formatted message
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}

/// Converts resolved emails into lettre messages
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageAssembler;

impl MessageAssembler {
    /// Build the message
    ///
    /// Without attachments the body is a single part; with attachments the
    /// message is `multipart/mixed` with the body first and one part per file.
    pub fn assemble(email: &ResolvedEmail) -> EmailResult<OutboundMessage> {
        // Start building the message
        let mut message_builder = Message::builder()
            .message_id(Some(email.message_id.value()))
            .date_now()
            .from(email.from.clone())
            .subject(email.subject.clone());

        for reply_to in &email.reply_to {
            message_builder = message_builder.reply_to(reply_to.clone());
        }

        // Add recipients; absent classes are simply left out
        for to in &email.to {
            message_builder = message_builder.to(to.clone());
        }

        for cc in email.cc.iter().flatten() {
            message_builder = message_builder.cc(cc.clone());
        }

        for bcc in email.bcc.iter().flatten() {
            message_builder = message_builder.bcc(bcc.clone());
        }

        let envelope = Envelope::new(Some(email.envelope_from.clone()), email.recipients())
            .map_err(preparation)?;
        message_builder = message_builder.envelope(envelope);

        let content_type = ContentType::parse(&email.content_type).map_err(|e| {
            EmailError::DeliveryPreparation(format!(
                "invalid content type |{}|: {}",
                email.content_type, e
            ))
        })?;

        // Create message body
        let message = if email.attachments.is_empty() {
            message_builder
                .header(content_type)
                .body(email.body.clone())
        } else {
            let mut multipart = MultiPart::mixed().singlepart(
                SinglePart::builder()
                    .header(content_type)
                    .body(email.body.clone()),
            );

            for file in &email.attachments {
                multipart = multipart.singlepart(attachment(file)?);
            }

            message_builder.multipart(multipart)
        };

        Ok(OutboundMessage {
            message_id: email.message_id.clone(),
            message: message.map_err(preparation)?,
        })
    }
}

fn attachment(file: &Path) -> EmailResult<SinglePart> {
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            EmailError::DeliveryPreparation(format!(
                "attachment |{}| has no file name",
                file.display()
            ))
        })?;

    let content = fs::read(file).map_err(|e| {
        EmailError::DeliveryPreparation(format!(
            "cannot read attachment |{}|: {}",
            file.display(),
            e
        ))
    })?;

    let content_type = ContentType::parse(&attachment_type(file)).map_err(preparation)?;
    Ok(Attachment::new(file_name).body(content, content_type))
}

// MIME type guessed from the file extension, octet-stream when unknown
fn attachment_type(file: &Path) -> String {
    mime_guess::from_path(file)
        .first_or_octet_stream()
        .to_string()
}

fn preparation<E: std::fmt::Display>(error: E) -> EmailError {
    EmailError::DeliveryPreparation(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::address::parse_list;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn resolved() -> ResolvedEmail {
        ResolvedEmail {
            message_id: MessageId::from_parts("0123456789abcdef0123456789abcdef", "mailer.x.com"),
            from: "App <app@x.com>".parse().unwrap(),
            envelope_from: "bounce@x.com".parse().unwrap(),
            reply_to: parse_list("help@x.com").unwrap(),
            to: parse_list("a@x.com, b@x.com").unwrap(),
            cc: None,
            bcc: Some(parse_list("audit@x.com").unwrap()),
            subject: "Quarterly report".to_string(),
            content_type: "text/plain; charset=UTF-8".to_string(),
            body: "See attached".to_string(),
            attachments: Vec::new(),
        }
    }

    fn formatted(message: &OutboundMessage) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    fn boundary(formatted: &str) -> String {
        let start = formatted.find("boundary=\"").unwrap() + "boundary=\"".len();
        let end = formatted[start..].find('"').unwrap();
        formatted[start..start + end].to_string()
    }

    #[test]
    fn test_single_part_message() {
        let message = MessageAssembler::assemble(&resolved()).unwrap();
        let text = formatted(&message);

        assert!(text.contains("Message-ID: <0123456789abcdef0123456789abcdef@mailer.x.com>"));
        assert!(text.contains("Subject: Quarterly report"));
        assert!(text.contains("Reply-To: help@x.com"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8")
            || text.contains("Content-Type: text/plain; charset=UTF-8"));
        assert!(text.contains("Date: "));
        assert!(!text.contains("Cc: "));
        assert!(!text.contains("multipart"));
        assert!(text.contains("\r\n\r\nSee attached"));
    }

    #[test]
    fn test_envelope_uses_resolved_envelope_from() {
        let message = MessageAssembler::assemble(&resolved()).unwrap();
        let envelope = message.envelope();

        assert_eq!(envelope.from().unwrap().to_string(), "bounce@x.com");
        let recipients: Vec<String> = envelope.to().iter().map(ToString::to_string).collect();
        assert_eq!(recipients, vec!["a@x.com", "b@x.com", "audit@x.com"]);
    }

    #[test]
    fn test_multipart_with_attachments() {
        let dir = TempDir::new().unwrap();
        let files: Vec<PathBuf> = ["report.txt", "data.csv"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, format!("content of {}", name)).unwrap();
                path
            })
            .collect();

        let email = ResolvedEmail {
            attachments: files,
            ..resolved()
        };
        let message = MessageAssembler::assemble(&email).unwrap();
        let text = formatted(&message);

        assert!(text.contains("multipart/mixed"));
        let boundary = boundary(&text);
        let delimiter = format!("--{}\r\n", boundary);
        assert_eq!(text.matches(&delimiter).count(), 1 + email.attachments.len());

        assert!(text.contains("filename=\"report.txt\""));
        assert!(text.contains("filename=\"data.csv\""));
        assert!(text.contains("Content-Type: text/csv"));
    }

    #[test]
    fn test_attachment_type_follows_extension() {
        assert_eq!(attachment_type(Path::new("/tmp/invoice.pdf")), "application/pdf");
        assert_eq!(attachment_type(Path::new("report.txt")), "text/plain");
        assert_eq!(
            attachment_type(Path::new("archive.unknownext")),
            "application/octet-stream"
        );
        assert_eq!(attachment_type(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_missing_attachment_fails_preparation() {
        let email = ResolvedEmail {
            attachments: vec![PathBuf::from("/definitely/not/here.bin")],
            ..resolved()
        };
        assert!(matches!(
            MessageAssembler::assemble(&email),
            Err(EmailError::DeliveryPreparation(_))
        ));
    }

    #[test]
    fn test_invalid_content_type_fails_preparation() {
        let email = ResolvedEmail {
            content_type: "not a content type".to_string(),
            ..resolved()
        };
        assert!(matches!(
            MessageAssembler::assemble(&email),
            Err(EmailError::DeliveryPreparation(_))
        ));
    }
}
