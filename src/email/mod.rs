pub mod address;
pub mod bounce;
pub mod draft;
pub mod message_id;
pub mod model;
pub mod resolve;
pub mod sender;
pub mod trace;

pub use lettre::message::Mailbox;
pub use draft::{EmailDraft, RecipientKind};
pub use message_id::MessageId;
pub use model::{MailFields, MailModel, Payload};
pub use resolve::{FieldResolver, PartialEmail, ResolvedEmail, SenderDefaults, DEFAULT_CONTENT_TYPE};
pub use sender::{DeliveryMode, EmailSender, EmailSenderBuilder, SendReceipt};

use thiserror::Error;

/// Email composition and delivery errors
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Invalid email address |{token}|: {reason}")]
    AddressFormat { token: String, reason: String },

    #[error("Envelope address cannot have personal data: {0}")]
    EnvelopeAddress(String),

    #[error("Malformed message id |{value}|: {reason}")]
    Format { value: String, reason: String },

    #[error("Missing required field <{0}>")]
    MissingRequiredField(&'static str),

    #[error("Send accepts at most one payload, got {0}")]
    TooManyArguments(usize),

    #[error("Email template |{0}| not found")]
    TemplateNotFound(String),

    #[error("Templates repository is not configured. Maybe forgot to set |{0}|")]
    RepositoryNotConfigured(&'static str),

    #[error("Failed to render template |{template}|: {reason}")]
    TemplateRender { template: String, reason: String },

    #[error("Missing user |{0}| password for authenticated session")]
    MissingCredential(String),

    #[error("Unable to look up mail session |{0}|")]
    SessionLookup(String),

    #[error("Mail session is not configured")]
    SessionNotConfigured,

    #[error("Message preparation failed: {0}")]
    DeliveryPreparation(String),

    #[error("Transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EmailResult<T> = Result<T, EmailError>;

impl EmailError {
    /// Wrap an opaque transport failure
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EmailError::Transport(Box::new(error))
    }

    pub(crate) fn address(token: impl Into<String>, reason: impl ToString) -> Self {
        EmailError::AddressFormat {
            token: token.into(),
            reason: reason.to_string(),
        }
    }
}
