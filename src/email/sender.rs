use crate::config::EmailConfig;
use crate::email::address::{parse_list, parse_one};
use crate::email::message_id::is_valid_id_right;
use crate::email::resolve::describe;
use crate::email::trace::write_trace;
use crate::email::{
    EmailDraft, EmailError, EmailResult, FieldResolver, MessageId, PartialEmail, ResolvedEmail,
    SenderDefaults, DEFAULT_CONTENT_TYPE,
};
use crate::smtp::{self, MessageAssembler, SessionConfigurator, SessionDirectory, SessionSettings};
use crate::template::{
    renderer_for, FileTemplateRepository, Template, TemplateRef, TemplateRenderer,
    TemplateRepository,
};
use chrono::{DateTime, Utc};
use lettre::Address;
use serde_json::Value;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// How a message left the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Handed to the transport
    Sent,
    /// Written to the trace sink in development mode
    Traced,
}

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    /// Always set for sent messages; a trace may lack one
    pub envelope_from: Option<Address>,
    pub recipients: Vec<Address>,
    pub sent_at: DateTime<Utc>,
    pub mode: DeliveryMode,
}

impl SendReceipt {
    fn sent(email: &ResolvedEmail) -> Self {
        Self {
            message_id: email.message_id.clone(),
            envelope_from: Some(email.envelope_from.clone()),
            recipients: email.recipients(),
            sent_at: Utc::now(),
            mode: DeliveryMode::Sent,
        }
    }

    fn traced(email: &PartialEmail) -> Self {
        Self {
            message_id: email.message_id.clone(),
            envelope_from: email.envelope_from.clone(),
            recipients: email.recipients(),
            sent_at: Utc::now(),
            mode: DeliveryMode::Traced,
        }
    }
}

/// Entry point of the composition engine
///
/// Holds the template repository, renderer, sender defaults and the session
/// configurator. Cheap to clone; every draft keeps a handle to its sender.
#[derive(Clone)]
pub struct EmailSender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    dev_mode: bool,
    repository: Option<Arc<dyn TemplateRepository>>,
    renderer: Arc<dyn TemplateRenderer>,
    defaults: RwLock<SenderDefaults>,
    bounce_domain: Option<String>,
    id_right: String,
    sessions: Arc<SessionConfigurator>,
    trace_sink: Mutex<Box<dyn Write + Send>>,
}

impl EmailSender {
    pub fn builder() -> EmailSenderBuilder {
        EmailSenderBuilder::default()
    }

    /// Build a sender from loaded configuration
    pub fn from_config(config: &EmailConfig) -> EmailResult<Self> {
        EmailSenderBuilder::from_config(config)?.build()
    }

    /// Start a draft bound to the named template, default locale
    pub fn draft(&self, template_name: &str) -> EmailResult<EmailDraft> {
        self.create_draft(template_name, None)
    }

    /// Start a draft bound to a localized template
    ///
    /// Falls back from `lang-REGION` to `lang` to the default locale.
    pub fn draft_localized(&self, locale: &str, template_name: &str) -> EmailResult<EmailDraft> {
        self.create_draft(template_name, Some(locale))
    }

    /// Override the default sender address at runtime
    pub fn set_from_address(&self, address: &str) -> EmailResult<()> {
        let from = parse_one(address)?;
        tracing::debug!("Default from address set to {}", from);

        let mut defaults = self
            .inner
            .defaults
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        defaults.from = Some(from);
        Ok(())
    }

    /// Send an ad-hoc message without a template
    ///
    /// Replies and bounces go back to `from`; the body uses the default
    /// content type.
    pub async fn send_plain(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        content: &str,
    ) -> EmailResult<SendReceipt> {
        if subject.trim().is_empty() {
            return Err(EmailError::Validation(
                "Subject argument is null or empty".to_string(),
            ));
        }
        if to.trim().is_empty() {
            return Err(EmailError::Validation(
                "To addresses argument is null or empty".to_string(),
            ));
        }
        let from = parse_one(from)?;
        let to = parse_list(to)?;

        let content_type = self
            .defaults()
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let email = ResolvedEmail {
            message_id: self.next_message_id(),
            envelope_from: from.email.clone(),
            reply_to: vec![from.clone()],
            from,
            to,
            cc: None,
            bcc: None,
            subject: subject.to_string(),
            content_type,
            body: content.to_string(),
            attachments: Vec::new(),
        };

        if self.inner.dev_mode {
            return self.trace(email.into());
        }
        self.deliver(email).await
    }

    /// Warm reconfiguration: replaces the transport session only
    ///
    /// Templates, renderer and sender defaults are kept.
    pub fn reconfigure(&self, config: &EmailConfig) -> EmailResult<()> {
        self.inner.sessions.configure(&config.session)?;
        Ok(())
    }

    pub fn is_dev_mode(&self) -> bool {
        self.inner.dev_mode
    }

    pub fn renderer_name(&self) -> &str {
        self.inner.renderer.name()
    }

    /// Right part of the message ids this sender generates
    pub fn id_right(&self) -> &str {
        &self.inner.id_right
    }

    pub fn bounce_domain(&self) -> Option<&str> {
        self.inner.bounce_domain.as_deref()
    }

    pub fn sessions(&self) -> &Arc<SessionConfigurator> {
        &self.inner.sessions
    }

    /// Snapshot of the current sender defaults
    pub fn defaults(&self) -> SenderDefaults {
        self.inner
            .defaults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn render(&self, template: &Template, data: &Value) -> EmailResult<String> {
        self.inner.renderer.render(template, data)
    }

    /// Resolve a rendered draft and deliver it
    ///
    /// Development mode traces whatever resolved; missing mandatory fields
    /// only fail a real delivery.
    pub(crate) async fn dispatch(&self, draft: EmailDraft) -> EmailResult<SendReceipt> {
        let defaults = self.defaults();
        let session_from = self.inner.sessions.default_from_address();

        let email = FieldResolver::new(&defaults)
            .with_session_from(session_from.as_ref())
            .with_bounce_domain(self.inner.bounce_domain.as_deref())
            .resolve_partial(&draft)?;

        if self.inner.dev_mode {
            return self.trace(email);
        }
        self.deliver(email.complete()?).await
    }

    async fn deliver(&self, email: ResolvedEmail) -> EmailResult<SendReceipt> {
        let session = self
            .inner
            .sessions
            .current_session()
            .ok_or(EmailError::SessionNotConfigured)?;

        let message = MessageAssembler::assemble(&email)?;
        smtp::submit(session.as_ref(), &message).await?;

        tracing::info!("Email sent: {}", describe(&email));
        Ok(SendReceipt::sent(&email))
    }

    fn trace(&self, email: PartialEmail) -> EmailResult<SendReceipt> {
        let mut sink = self
            .inner
            .trace_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        write_trace(&mut **sink, &email)?;

        tracing::debug!("Email traced: {}", email.message_id);
        Ok(SendReceipt::traced(&email))
    }

    fn create_draft(&self, template_name: &str, locale: Option<&str>) -> EmailResult<EmailDraft> {
        if template_name.trim().is_empty() {
            return Err(EmailError::Validation(
                "Template name argument is null or empty".to_string(),
            ));
        }

        let template = self.lookup(template_name, locale)?;
        let message_id = self.next_message_id();
        tracing::debug!(
            "Create draft {} from template |{}|",
            message_id,
            template.name()
        );

        Ok(EmailDraft::new(self.clone(), template, message_id))
    }

    fn lookup(&self, template_name: &str, locale: Option<&str>) -> EmailResult<TemplateRef> {
        let repository = self
            .inner
            .repository
            .as_ref()
            .ok_or(EmailError::RepositoryNotConfigured("repository_path"))?;
        repository.lookup(template_name, locale)
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::generate(self.inner.id_right.as_str())
    }
}

impl fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSender")
            .field("dev_mode", &self.inner.dev_mode)
            .field("renderer", &self.inner.renderer.name())
            .field("has_repository", &self.inner.repository.is_some())
            .field("bounce_domain", &self.inner.bounce_domain)
            .field("id_right", &self.inner.id_right)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EmailSender`]
#[derive(Default)]
pub struct EmailSenderBuilder {
    dev_mode: bool,
    repository: Option<Arc<dyn TemplateRepository>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    defaults: Option<SenderDefaults>,
    bounce_domain: Option<String>,
    message_id_domain: Option<String>,
    sessions: Option<Arc<SessionConfigurator>>,
    session_directory: Option<Arc<dyn SessionDirectory>>,
    session_settings: Option<SessionSettings>,
    trace_sink: Option<Box<dyn Write + Send>>,
}

impl EmailSenderBuilder {
    /// Builder populated from configuration; scans the template repository
    pub fn from_config(config: &EmailConfig) -> EmailResult<Self> {
        config.validate()?;
        let sender = &config.sender;

        let mut builder = Self::default()
            .dev_mode(sender.dev_mode)
            .renderer(renderer_for(Some(&sender.template_engine))?)
            .defaults(sender.defaults.to_sender_defaults()?)
            .session_settings(config.session.clone());

        if let Some(path) = &sender.repository_path {
            let repository = FileTemplateRepository::scan(path, Some(&sender.files_pattern))?;
            builder = builder.repository(Arc::new(repository));
        }
        if let Some(domain) = &sender.bounce_domain {
            builder = builder.bounce_domain(domain.clone());
        }
        if let Some(domain) = &sender.message_id_domain {
            builder = builder.message_id_domain(domain.clone());
        }

        Ok(builder)
    }

    pub fn dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn repository(mut self, repository: Arc<dyn TemplateRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn defaults(mut self, defaults: SenderDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn bounce_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.bounce_domain = Some(domain.into());
        self
    }

    pub fn message_id_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.message_id_domain = Some(domain.into());
        self
    }

    /// Share an existing session configurator
    pub fn sessions(mut self, sessions: Arc<SessionConfigurator>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Directory for resource references, used when no configurator is shared
    pub fn session_directory(mut self, directory: Arc<dyn SessionDirectory>) -> Self {
        self.session_directory = Some(directory);
        self
    }

    /// Settings applied to the session configurator on build
    pub fn session_settings(mut self, settings: SessionSettings) -> Self {
        self.session_settings = Some(settings);
        self
    }

    /// Destination of development mode traces, stdout by default
    pub fn trace_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn build(self) -> EmailResult<EmailSender> {
        let id_right = match self.message_id_domain {
            Some(domain) if is_valid_id_right(&domain) => domain,
            Some(domain) => {
                return Err(EmailError::Config(format!(
                    "invalid message id domain |{}|",
                    domain
                )))
            }
            None => local_id_right(),
        };

        let sessions = match (self.sessions, self.session_directory) {
            (Some(sessions), _) => sessions,
            (None, Some(directory)) => Arc::new(SessionConfigurator::with_directory(directory)),
            (None, None) => Arc::new(SessionConfigurator::new()),
        };
        if let Some(settings) = &self.session_settings {
            sessions.configure(settings)?;
        }

        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => renderer_for(None)?,
        };

        tracing::info!(
            "Email sender ready: renderer {}, dev mode {}, id right {}",
            renderer.name(),
            self.dev_mode,
            id_right
        );

        Ok(EmailSender {
            inner: Arc::new(SenderInner {
                dev_mode: self.dev_mode,
                repository: self.repository,
                renderer,
                defaults: RwLock::new(self.defaults.unwrap_or_else(SenderDefaults::standard)),
                bounce_domain: self.bounce_domain,
                id_right,
                sessions,
                trace_sink: Mutex::new(
                    self.trace_sink
                        .unwrap_or_else(|| Box::new(io::stdout()) as Box<dyn Write + Send>),
                ),
            }),
        })
    }
}

// Host name of this machine, `localhost` when unavailable or unusable
pub(crate) fn local_id_right() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| is_valid_id_right(name))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Payload;
    use crate::template::MemoryTemplateRepository;
    use serde_json::json;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn dev_sender(buffer: &SharedBuffer) -> EmailSender {
        let repository = MemoryTemplateRepository::new()
            .with_template("welcome", "Hello {{ name }}")
            .unwrap()
            .with_localized("ro", "welcome", "Salut {{ name }}")
            .unwrap();

        EmailSender::builder()
            .dev_mode(true)
            .repository(Arc::new(repository))
            .defaults(SenderDefaults {
                from: Some("noreply@x.com".parse().unwrap()),
                ..SenderDefaults::standard()
            })
            .message_id_domain("mailer.x.com")
            .trace_sink(Box::new(buffer.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dev_mode_writes_trace() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);

        let receipt = sender
            .draft("welcome")
            .unwrap()
            .to(["a@x.com"])
            .unwrap()
            .subject("Welcome")
            .unwrap()
            .send_with(Payload::data(&json!({ "name": "Ana" })).unwrap())
            .await
            .unwrap();

        assert_eq!(receipt.mode, DeliveryMode::Traced);
        assert_eq!(receipt.message_id.id_right(), "mailer.x.com");
        assert_eq!(receipt.envelope_from.unwrap().to_string(), "noreply@x.com");

        let trace = buffer.contents();
        assert!(trace.starts_with("FROM: noreply@x.com\r\n"));
        assert!(trace.contains("SUBJECT: Welcome\r\n\r\nHello Ana\r\n"));
    }

    #[tokio::test]
    async fn test_localized_draft() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);

        sender
            .draft_localized("ro-RO", "welcome")
            .unwrap()
            .to(["a@x.com"])
            .unwrap()
            .subject("Bun venit")
            .unwrap()
            .send_with(Payload::data(&json!({ "name": "Ana" })).unwrap())
            .await
            .unwrap();

        assert!(buffer.contents().contains("Salut Ana"));
    }

    #[tokio::test]
    async fn test_set_from_address_overrides_default() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);
        sender.set_from_address("Team <team@x.com>").unwrap();

        let receipt = sender
            .draft("welcome")
            .unwrap()
            .to(["a@x.com"])
            .unwrap()
            .subject("hi")
            .unwrap()
            .send_with(Payload::data(&json!({ "name": "Ana" })).unwrap())
            .await
            .unwrap();

        assert_eq!(receipt.envelope_from.unwrap().to_string(), "team@x.com");
        assert!(buffer.contents().starts_with("FROM: Team <team@x.com>\r\n"));
        assert!(matches!(
            sender.set_from_address("nonsense"),
            Err(EmailError::AddressFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_plain_in_dev_mode() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);

        let receipt = sender
            .send_plain("ops@x.com", "a@x.com, b@x.com", "Alert", "Disk full")
            .await
            .unwrap();

        assert_eq!(receipt.recipients.len(), 2);
        assert_eq!(receipt.envelope_from.unwrap().to_string(), "ops@x.com");
        let trace = buffer.contents();
        assert!(trace.contains(&format!("CONTENT TYPE: {}\r\n", DEFAULT_CONTENT_TYPE)));
        assert!(trace.contains("Disk full"));

        assert!(matches!(
            sender.send_plain("ops@x.com", "a@x.com", " ", "x").await,
            Err(EmailError::Validation(_))
        ));
        assert!(matches!(
            sender.send_plain("ops@x.com", "  ", "Alert", "x").await,
            Err(EmailError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_dev_mode_traces_draft_without_recipients() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);

        let receipt = sender
            .draft("welcome")
            .unwrap()
            .subject("hi")
            .unwrap()
            .send_with(Payload::data(&json!({ "name": "Ana" })).unwrap())
            .await
            .unwrap();

        assert_eq!(receipt.mode, DeliveryMode::Traced);
        assert!(receipt.recipients.is_empty());
        assert_eq!(
            buffer.contents(),
            "FROM: noreply@x.com\r\n\
             ENVELOPE FROM: noreply@x.com\r\n\
             CONTENT TYPE: text/html; charset=UTF-8\r\n\
             SUBJECT: hi\r\n\
             \r\n\
             Hello Ana\r\n"
        );
    }

    #[tokio::test]
    async fn test_dev_mode_traces_draft_without_from() {
        let buffer = SharedBuffer::default();
        let repository = MemoryTemplateRepository::new()
            .with_template("notice", "Maintenance tonight")
            .unwrap();
        let sender = EmailSender::builder()
            .dev_mode(true)
            .repository(Arc::new(repository))
            .trace_sink(Box::new(buffer.clone()))
            .build()
            .unwrap();

        let receipt = sender
            .draft("notice")
            .unwrap()
            .to(["a@x.com"])
            .unwrap()
            .send(Vec::new())
            .await
            .unwrap();

        assert!(receipt.envelope_from.is_none());
        let trace = buffer.contents();
        assert!(trace.starts_with("FROM: \r\nENVELOPE FROM: \r\nTO: a@x.com\r\n"));
        assert!(trace.contains("SUBJECT: \r\n\r\nMaintenance tonight\r\n"));
    }

    #[test]
    fn test_repository_not_configured() {
        let sender = EmailSender::builder().dev_mode(true).build().unwrap();
        assert!(matches!(
            sender.draft("welcome"),
            Err(EmailError::RepositoryNotConfigured("repository_path"))
        ));
    }

    #[test]
    fn test_unknown_template() {
        let buffer = SharedBuffer::default();
        let sender = dev_sender(&buffer);
        assert!(matches!(
            sender.draft("missing"),
            Err(EmailError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_message_id_domain() {
        let result = EmailSender::builder().message_id_domain("a b").build();
        assert!(matches!(result, Err(EmailError::Config(_))));
    }

    #[test]
    fn test_default_id_right_is_valid() {
        let sender = EmailSender::builder().build().unwrap();
        assert!(is_valid_id_right(sender.id_right()));
        assert_eq!(sender.renderer_name(), "tera");
    }

    #[tokio::test]
    async fn test_delivery_requires_session() {
        let repository = MemoryTemplateRepository::new()
            .with_template("welcome", "Hello")
            .unwrap();
        let sender = EmailSender::builder()
            .repository(Arc::new(repository))
            .defaults(SenderDefaults {
                from: Some("noreply@x.com".parse().unwrap()),
                ..SenderDefaults::standard()
            })
            .build()
            .unwrap();

        let result = sender
            .draft("welcome")
            .unwrap()
            .to(["a@x.com"])
            .unwrap()
            .subject("hi")
            .unwrap()
            .send(Vec::new())
            .await;
        assert!(matches!(result, Err(EmailError::SessionNotConfigured)));
    }
}
