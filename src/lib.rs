pub mod cli;
pub mod config;
pub mod email;
pub mod smtp;
pub mod template;

pub use config::EmailConfig;
pub use email::{EmailDraft, EmailError, EmailResult, EmailSender, MessageId, Payload};
