use crate::email::{EmailError, EmailResult, Mailbox};
use crate::smtp::{SmtpConfig, SmtpSecurity, TransportHandle, TransportProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_PROTOCOL: &str = "smtp";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Transport session settings, the `[session]` configuration table
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: Option<bool>,
    pub starttls: Option<bool>,
    pub timeout_secs: Option<u64>,
    /// Name of an externally managed session, see [`SessionDirectory`]
    pub resource_reference: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl SessionSettings {
    /// Plain settings for a host
    pub fn for_host<S: Into<String>>(host: S) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Settings pointing at an externally managed session
    pub fn for_reference<S: Into<String>>(reference: S) -> Self {
        Self {
            resource_reference: Some(reference.into()),
            ..Self::default()
        }
    }

    /// One `key: value` line per present setting, password masked
    pub fn dump(&self) -> String {
        let mut lines = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                lines.push(format!("\t- {}: {}", key, value));
            }
        };

        push("protocol", self.protocol.clone());
        push("host", self.host.clone());
        push("port", self.port.map(|p| p.to_string()));
        push("debug", self.debug.map(|d| d.to_string()));
        push("starttls", self.starttls.map(|s| s.to_string()));
        push("timeout_secs", self.timeout_secs.map(|t| t.to_string()));
        push("resource_reference", self.resource_reference.clone());
        push("user", self.user.clone());
        push("password", self.password.as_ref().map(|_| "********".to_string()));

        lines.join("\r\n")
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("debug", &self.debug)
            .field("starttls", &self.starttls)
            .field("timeout_secs", &self.timeout_secs)
            .field("resource_reference", &self.resource_reference)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// An immutable, fully configured transport session
///
/// Reconfiguration builds a new value; holders of an older `Arc` keep a
/// consistent session until they drop it.
pub struct MailSession {
    protocol: String,
    host: String,
    port: u16,
    debug: bool,
    user: Option<String>,
    default_from: Option<Mailbox>,
    provider: Arc<dyn TransportProvider>,
}

impl MailSession {
    /// Session over a custom transport provider, as registered in a directory
    pub fn with_provider<S: Into<String>>(host: S, provider: Arc<dyn TransportProvider>) -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: host.into(),
            port: default_port(DEFAULT_PROTOCOL),
            debug: false,
            user: None,
            default_from: None,
            provider,
        }
    }

    /// Sender address the session supplies when nothing else does
    pub fn with_default_from(mut self, from: Mailbox) -> Self {
        self.default_from = Some(from);
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn default_from(&self) -> Option<&Mailbox> {
        self.default_from.as_ref()
    }

    /// A fresh, unconnected transport handle
    pub fn transport(&self) -> EmailResult<TransportHandle> {
        self.provider.transport()
    }

    /// Provider handing out this session's transports
    pub fn provider(&self) -> &dyn TransportProvider {
        self.provider.as_ref()
    }
}

impl TransportProvider for MailSession {
    fn transport(&self) -> EmailResult<TransportHandle> {
        self.provider.transport()
    }
}

impl fmt::Debug for MailSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSession")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("debug", &self.debug)
            .field("user", &self.user)
            .field("default_from", &self.default_from)
            .finish_non_exhaustive()
    }
}

/// Lookup of externally managed sessions by reference name
pub trait SessionDirectory: Send + Sync {
    fn lookup(&self, reference: &str) -> Option<Arc<MailSession>>;
}

/// In-memory session directory
#[derive(Debug, Default)]
pub struct NamedSessions {
    sessions: HashMap<String, Arc<MailSession>>,
}

impl NamedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session<S: Into<String>>(mut self, reference: S, session: MailSession) -> Self {
        self.insert(reference, session);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, reference: S, session: MailSession) {
        self.sessions.insert(reference.into(), Arc::new(session));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionDirectory for NamedSessions {
    fn lookup(&self, reference: &str) -> Option<Arc<MailSession>> {
        self.sessions.get(reference).cloned()
    }
}

/// Process-wide holder of the current transport session
///
/// One lock guards both reconfiguration and reads. Readers get an `Arc`
/// to a complete session, never a partially built one.
pub struct SessionConfigurator {
    directory: Option<Arc<dyn SessionDirectory>>,
    session: Mutex<Option<Arc<MailSession>>>,
}

impl SessionConfigurator {
    /// Unconfigured, without a session directory
    pub fn new() -> Self {
        Self {
            directory: None,
            session: Mutex::new(None),
        }
    }

    /// Unconfigured, resolving resource references through `directory`
    pub fn with_directory(directory: Arc<dyn SessionDirectory>) -> Self {
        Self {
            directory: Some(directory),
            session: Mutex::new(None),
        }
    }

    /// Build a session from settings and make it current
    ///
    /// Calling again replaces the whole session; a failed call leaves the
    /// previous one in place.
    pub fn configure(&self, settings: &SessionSettings) -> EmailResult<Arc<MailSession>> {
        let mut current = self.lock();

        tracing::debug!("Configure mail session:\r\n{}", settings.dump());
        let session = self.build(settings)?;

        if current.is_some() {
            tracing::info!(
                "Mail session reconfigured: {}://{}:{}",
                session.protocol,
                session.host,
                session.port
            );
        } else {
            tracing::info!(
                "Mail session configured: {}://{}:{}",
                session.protocol,
                session.host,
                session.port
            );
        }

        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Current session, `None` until the first successful `configure`
    pub fn current_session(&self) -> Option<Arc<MailSession>> {
        self.lock().clone()
    }

    /// Default sender exposed by the current session, if any
    pub fn default_from_address(&self) -> Option<Mailbox> {
        self.lock()
            .as_ref()
            .and_then(|session| session.default_from.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<MailSession>>> {
        // A panic while holding the lock cannot leave a half-built session
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self, settings: &SessionSettings) -> EmailResult<Arc<MailSession>> {
        if let Some(reference) = present(&settings.resource_reference) {
            return self.look_up(reference);
        }

        let protocol = present(&settings.protocol)
            .unwrap_or(DEFAULT_PROTOCOL)
            .to_ascii_lowercase();
        let host = match present(&settings.host) {
            Some(host) => host.to_string(),
            None => {
                tracing::debug!("Mail session host is missing. Force {}.", DEFAULT_HOST);
                DEFAULT_HOST.to_string()
            }
        };
        let debug = settings.debug.unwrap_or(false);

        let security = match protocol.as_str() {
            "smtps" => SmtpSecurity::Tls,
            "smtp" if settings.starttls.unwrap_or(false) => SmtpSecurity::StartTls,
            "smtp" => SmtpSecurity::None,
            other => {
                return Err(EmailError::Config(format!(
                    "unsupported transport protocol |{}|",
                    other
                )))
            }
        };
        let port = settings.port.unwrap_or_else(|| default_port(&protocol));
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let mut config = SmtpConfig::new(host.clone(), port)
            .with_security(security)
            .with_timeout(timeout)
            .with_debug(debug);

        let user = present(&settings.user).map(str::to_string);
        if let Some(user) = &user {
            let password = settings
                .password
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| EmailError::MissingCredential(user.clone()))?;
            config = config.with_credentials(user.clone(), password);
        }

        Ok(Arc::new(MailSession {
            protocol,
            host,
            port,
            debug,
            user,
            default_from: None,
            provider: Arc::new(config),
        }))
    }

    fn look_up(&self, reference: &str) -> EmailResult<Arc<MailSession>> {
        let session = self
            .directory
            .as_ref()
            .and_then(|directory| directory.lookup(reference))
            .ok_or_else(|| EmailError::SessionLookup(reference.to_string()))?;

        tracing::debug!("Mail session |{}| looked up: {:?}", reference, session);
        Ok(session)
    }
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfigurator")
            .field("has_directory", &self.directory.is_some())
            .field("session", &self.current_session())
            .finish()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn default_port(protocol: &str) -> u16 {
    match protocol {
        "smtps" => 465,
        _ => 25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::{OutboundMessage, Transport};
    use async_trait::async_trait;
    use std::thread;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&mut self) -> EmailResult<()> {
            Ok(())
        }

        async fn send(&mut self, _message: &OutboundMessage) -> EmailResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> EmailResult<()> {
            Ok(())
        }
    }

    struct NullProvider;

    impl TransportProvider for NullProvider {
        fn transport(&self) -> EmailResult<TransportHandle> {
            Ok(Box::new(NullTransport))
        }
    }

    #[test]
    fn test_defaults_are_filled() {
        let configurator = SessionConfigurator::new();
        assert!(!configurator.is_configured());
        assert!(configurator.current_session().is_none());

        let session = configurator.configure(&SessionSettings::default()).unwrap();
        assert_eq!(session.protocol(), "smtp");
        assert_eq!(session.host(), "localhost");
        assert_eq!(session.port(), 25);
        assert!(!session.debug());
        assert!(session.user().is_none());
        assert!(configurator.is_configured());
    }

    #[test]
    fn test_smtps_uses_implicit_tls_port() {
        let configurator = SessionConfigurator::new();
        let settings = SessionSettings {
            protocol: Some("SMTPS".to_string()),
            ..SessionSettings::for_host("mail.x.com")
        };
        let session = configurator.configure(&settings).unwrap();
        assert_eq!(session.protocol(), "smtps");
        assert_eq!(session.port(), 465);
    }

    #[test]
    fn test_unknown_protocol_is_rejected() {
        let settings = SessionSettings {
            protocol: Some("imap".to_string()),
            ..SessionSettings::default()
        };
        let result = SessionConfigurator::new().configure(&settings);
        assert!(matches!(result, Err(EmailError::Config(_))));
    }

    #[test]
    fn test_user_without_password() {
        let settings = SessionSettings {
            user: Some("mailer".to_string()),
            ..SessionSettings::for_host("mail.x.com")
        };
        match SessionConfigurator::new().configure(&settings) {
            Err(EmailError::MissingCredential(user)) => assert_eq!(user, "mailer"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_authenticated_session() {
        let settings = SessionSettings {
            user: Some("mailer".to_string()),
            password: Some("secret".to_string()),
            ..SessionSettings::for_host("mail.x.com")
        };
        let session = SessionConfigurator::new().configure(&settings).unwrap();
        assert_eq!(session.user(), Some("mailer"));
    }

    #[test]
    fn test_dump_masks_password() {
        let settings = SessionSettings {
            user: Some("mailer".to_string()),
            password: Some("secret".to_string()),
            ..SessionSettings::for_host("mail.x.com")
        };
        let dump = settings.dump();
        assert!(dump.contains("host: mail.x.com"));
        assert!(dump.contains("user: mailer"));
        assert!(!dump.contains("secret"));
        assert!(!format!("{:?}", settings).contains("secret"));
    }

    #[test]
    fn test_resource_reference_lookup() {
        let directory = NamedSessions::new().with_session(
            "mail/Session",
            MailSession::with_provider("container.x.com", Arc::new(NullProvider))
                .with_default_from("container@x.com".parse().unwrap()),
        );
        let configurator = SessionConfigurator::with_directory(Arc::new(directory));

        let session = configurator
            .configure(&SessionSettings::for_reference("mail/Session"))
            .unwrap();
        assert_eq!(session.host(), "container.x.com");
        assert_eq!(
            configurator.default_from_address().unwrap().to_string(),
            "container@x.com"
        );

        let missing = configurator.configure(&SessionSettings::for_reference("mail/Other"));
        assert!(matches!(missing, Err(EmailError::SessionLookup(_))));
        // failed reconfiguration keeps the previous session
        assert_eq!(
            configurator.current_session().unwrap().host(),
            "container.x.com"
        );
    }

    #[test]
    fn test_lookup_without_directory_fails() {
        let result =
            SessionConfigurator::new().configure(&SessionSettings::for_reference("mail/Session"));
        assert!(matches!(result, Err(EmailError::SessionLookup(_))));
    }

    #[test]
    fn test_plain_session_has_no_default_from() {
        let configurator = SessionConfigurator::new();
        configurator
            .configure(&SessionSettings::for_host("mail.x.com"))
            .unwrap();
        assert!(configurator.default_from_address().is_none());
    }

    #[test]
    fn test_reconfigure_replaces_session() {
        let configurator = SessionConfigurator::new();
        let first = configurator
            .configure(&SessionSettings::for_host("first.x.com"))
            .unwrap();
        configurator
            .configure(&SessionSettings::for_host("second.x.com"))
            .unwrap();

        assert_eq!(configurator.current_session().unwrap().host(), "second.x.com");
        // earlier holders keep their complete session
        assert_eq!(first.host(), "first.x.com");
    }

    #[test]
    fn test_concurrent_readers_see_whole_sessions() {
        let configurator = Arc::new(SessionConfigurator::new());
        configurator
            .configure(&SessionSettings::for_host("a.x.com"))
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let configurator = Arc::clone(&configurator);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let session = configurator.current_session().unwrap();
                        assert!(matches!(session.host(), "a.x.com" | "b.x.com"));
                        assert_eq!(session.port(), 25);
                    }
                })
            })
            .collect();

        for i in 0..100 {
            let host = if i % 2 == 0 { "b.x.com" } else { "a.x.com" };
            configurator
                .configure(&SessionSettings::for_host(host))
                .unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
