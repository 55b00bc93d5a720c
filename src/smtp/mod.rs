pub mod client;
pub mod message;
pub mod session;

pub use client::{SmtpClient, SmtpConfig};
pub use message::{MessageAssembler, OutboundMessage};
pub use session::{
    MailSession, NamedSessions, SessionConfigurator, SessionDirectory, SessionSettings,
};

use crate::email::EmailResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A connectable handle over which assembled messages are submitted
#[async_trait]
pub trait Transport: Send {
    /// Open the connection; failures are fatal for the send
    async fn connect(&mut self) -> EmailResult<()>;

    /// Submit one message
    async fn send(&mut self, message: &OutboundMessage) -> EmailResult<()>;

    /// Release the connection; failures are logged by the caller, never fatal
    async fn close(&mut self) -> EmailResult<()>;
}

/// Owned, unconnected transport
pub type TransportHandle = Box<dyn Transport>;

/// Hands out transport handles for a configured session
pub trait TransportProvider: Send + Sync {
    fn transport(&self) -> EmailResult<TransportHandle>;
}

impl<T: TransportProvider + ?Sized> TransportProvider for Arc<T> {
    fn transport(&self) -> EmailResult<TransportHandle> {
        (**self).transport()
    }
}

/// SMTP connection security
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// No encryption
    #[default]
    None,
    /// STARTTLS upgrade, required
    StartTls,
    /// Direct TLS connection (`smtps`)
    Tls,
}

/// Submit a message over a fresh transport: connect, send, close
///
/// Close failures are logged and suppressed; they cannot affect a message
/// already accepted or rejected.
pub async fn submit(
    provider: &dyn TransportProvider,
    message: &OutboundMessage,
) -> EmailResult<()> {
    let mut transport = provider.transport()?;
    transport.connect().await?;

    let result = transport.send(message).await;

    if let Err(e) = transport.close().await {
        tracing::warn!("Error closing transport connection: {}", e);
    }

    result
}
