use crate::email::{EmailError, EmailResult};
use crate::smtp::{OutboundMessage, SmtpSecurity, Transport, TransportProvider};
use async_trait::async_trait;
use lettre::{
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::time::Duration;

/// SMTP client configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub credentials: Option<(String, String)>,
    pub timeout: Duration,
    pub debug: bool,
}

impl SmtpConfig {
    pub fn new(server: String, port: u16) -> Self {
        Self {
            server,
            port,
            security: SmtpSecurity::None,
            credentials: None,
            timeout: Duration::from_secs(30),
            debug: false,
        }
    }

    pub fn with_security(mut self, security: SmtpSecurity) -> Self {
        self.security = security;
        self
    }

    pub fn with_credentials(mut self, user: String, password: String) -> Self {
        self.credentials = Some((user, password));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl TransportProvider for SmtpConfig {
    fn transport(&self) -> EmailResult<Box<dyn Transport>> {
        Ok(Box::new(SmtpClient::new(self.clone())))
    }
}

/// SMTP transport handle; one connection per submission
pub struct SmtpClient {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpClient {
    /// Create a new, not yet connected, SMTP client
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    /// Build the lettre transport from configuration
    fn build_transport(config: &SmtpConfig) -> EmailResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
            .port(config.port)
            .timeout(Some(config.timeout));

        // Configure TLS
        match config.security {
            SmtpSecurity::None => {
                builder = builder.tls(Tls::None);
            }
            SmtpSecurity::StartTls => {
                let tls_parameters = TlsParameters::new(config.server.clone())
                    .map_err(|e| EmailError::Config(format!("TLS configuration failed: {}", e)))?;
                builder = builder.tls(Tls::Required(tls_parameters));
            }
            SmtpSecurity::Tls => {
                let tls_parameters = TlsParameters::new(config.server.clone())
                    .map_err(|e| EmailError::Config(format!("TLS configuration failed: {}", e)))?;
                builder = builder.tls(Tls::Wrapper(tls_parameters));
            }
        }

        if let Some((user, password)) = &config.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SmtpClient {
    async fn connect(&mut self) -> EmailResult<()> {
        let transport = Self::build_transport(&self.config)?;

        // Test connection by sending NOOP
        match transport.test_connection().await {
            Ok(true) => {
                tracing::debug!(
                    "SMTP connection open to {}:{}",
                    self.config.server,
                    self.config.port
                );
                self.transport = Some(transport);
                Ok(())
            }
            Ok(false) => Err(EmailError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!(
                    "SMTP server {}:{} did not accept the connection",
                    self.config.server, self.config.port
                ),
            ))),
            Err(e) => {
                tracing::error!("SMTP connection failed: {}", e);
                Err(EmailError::transport(e))
            }
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> EmailResult<()> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            EmailError::transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "SMTP transport is not connected",
            ))
        })?;

        if self.config.debug {
            tracing::debug!(
                "SMTP submission:\r\n{}",
                String::from_utf8_lossy(&message.formatted())
            );
        }

        match transport.send(message.message().clone()).await {
            Ok(response) => {
                tracing::info!(
                    "Email sent successfully: {} ({})",
                    message.message_id(),
                    response.code()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to send email {}: {}", message.message_id(), e);
                Err(EmailError::transport(e))
            }
        }
    }

    async fn close(&mut self) -> EmailResult<()> {
        // Dropping the transport closes its connection
        self.transport.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_config_builder() {
        let config = SmtpConfig::new("smtp.example.com".to_string(), 465)
            .with_security(SmtpSecurity::Tls)
            .with_credentials("user".to_string(), "pass".to_string())
            .with_timeout(Duration::from_secs(60))
            .with_debug(true);

        assert_eq!(config.server, "smtp.example.com");
        assert_eq!(config.port, 465);
        assert_eq!(config.security, SmtpSecurity::Tls);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.debug);
        assert_eq!(
            config.credentials,
            Some(("user".to_string(), "pass".to_string()))
        );
    }

    #[tokio::test]
    async fn test_build_transport_for_each_security() {
        for security in [SmtpSecurity::None, SmtpSecurity::StartTls, SmtpSecurity::Tls] {
            let config = SmtpConfig::new("localhost".to_string(), 2525).with_security(security);
            assert!(SmtpClient::build_transport(&config).is_ok());
        }
    }

    #[tokio::test]
    async fn test_send_without_connect_fails() {
        use crate::email::{address::parse_list, MessageId, ResolvedEmail};
        use crate::smtp::MessageAssembler;

        let email = ResolvedEmail {
            message_id: MessageId::generate("test"),
            from: "a@x.com".parse().unwrap(),
            envelope_from: "a@x.com".parse().unwrap(),
            reply_to: parse_list("a@x.com").unwrap(),
            to: parse_list("b@x.com").unwrap(),
            cc: None,
            bcc: None,
            subject: "s".to_string(),
            content_type: "text/plain".to_string(),
            body: "b".to_string(),
            attachments: Vec::new(),
        };
        let message = MessageAssembler::assemble(&email).unwrap();

        let mut client = SmtpClient::new(SmtpConfig::new("localhost".to_string(), 2525));
        assert!(matches!(
            client.send(&message).await,
            Err(EmailError::Transport(_))
        ));
        assert!(client.close().await.is_ok());
    }
}
