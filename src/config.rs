use crate::email::message_id::is_valid_id_right;
use crate::email::{EmailError, EmailResult, SenderDefaults, DEFAULT_CONTENT_TYPE};
use crate::smtp::SessionSettings;
use crate::template::renderer_for;
use crate::template::repository::DEFAULT_FILES_PATTERN;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sender defaults as written in the `[sender.defaults]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub content_type: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub envelope_from: Option<String>,
    pub reply_to: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            content_type: Some(DEFAULT_CONTENT_TYPE.to_string()),
            subject: None,
            from: None,
            envelope_from: None,
            reply_to: None,
        }
    }
}

impl DefaultsConfig {
    /// Parse addresses into resolver defaults
    pub fn to_sender_defaults(&self) -> EmailResult<SenderDefaults> {
        SenderDefaults::parse(
            self.content_type.as_deref(),
            self.subject.as_deref(),
            self.from.as_deref(),
            self.envelope_from.as_deref(),
            self.reply_to.as_deref(),
        )
    }
}

/// Composition engine settings, the `[sender]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Dump messages to the trace sink instead of sending them
    pub dev_mode: bool,
    pub repository_path: Option<PathBuf>,
    pub files_pattern: String,
    /// `tera` or `verbatim`
    pub template_engine: String,
    /// Enables VERP envelope addresses under this domain
    pub bounce_domain: Option<String>,
    /// Right part of generated message ids, host name when absent
    pub message_id_domain: Option<String>,
    pub defaults: DefaultsConfig,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            repository_path: None,
            files_pattern: DEFAULT_FILES_PATTERN.to_string(),
            template_engine: "tera".to_string(),
            bounce_domain: None,
            message_id_domain: None,
            defaults: DefaultsConfig::default(),
        }
    }
}

/// Complete `postbox` configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub sender: SenderConfig,
    pub session: SessionSettings,
}

impl EmailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$XDG_CONFIG_HOME/postbox/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("postbox").join("config.toml"))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> EmailResult<Self> {
        let config: EmailConfig = toml::from_str(content)
            .map_err(|e| EmailError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file; a missing file yields defaults
    pub async fn load_from_file(path: &Path) -> EmailResult<Self> {
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EmailError::Config(format!("Failed to read config: {}", e)))?;

        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> EmailResult<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| EmailError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EmailError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| EmailError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> EmailResult<()> {
        // Default addresses must parse, envelope from must be plain
        self.sender.defaults.to_sender_defaults()?;

        if self.sender.files_pattern.trim().is_empty() {
            return Err(EmailError::Config("files_pattern must not be empty".to_string()));
        }
        glob::Pattern::new(&self.sender.files_pattern).map_err(|e| {
            EmailError::Config(format!(
                "invalid files_pattern |{}|: {}",
                self.sender.files_pattern, e
            ))
        })?;

        renderer_for(Some(&self.sender.template_engine))?;

        if let Some(domain) = &self.sender.bounce_domain {
            if !is_valid_id_right(domain) {
                return Err(EmailError::Config(format!("invalid bounce_domain |{}|", domain)));
            }
        }

        if let Some(domain) = &self.sender.message_id_domain {
            if !is_valid_id_right(domain) {
                return Err(EmailError::Config(format!(
                    "invalid message_id_domain |{}|",
                    domain
                )));
            }
        }

        if let Some(protocol) = &self.session.protocol {
            if !matches!(protocol.to_ascii_lowercase().as_str(), "smtp" | "smtps") {
                return Err(EmailError::Config(format!(
                    "unsupported transport protocol |{}|",
                    protocol
                )));
            }
        }

        if self.session.timeout_secs == Some(0) {
            return Err(EmailError::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL_CONFIG: &str = r#"
[sender]
dev_mode = true
repository_path = "/srv/templates"
files_pattern = "*.htm"
template_engine = "verbatim"
bounce_domain = "bounce.x.com"
message_id_domain = "mailer.x.com"

[sender.defaults]
subject = "Notification"
from = "App <app@x.com>"
envelope_from = "returns@x.com"
reply_to = "help@x.com, sales@x.com"

[session]
protocol = "smtps"
host = "smtp.x.com"
port = 2465
user = "mailer"
password = "secret"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = EmailConfig::from_toml_str(FULL_CONFIG).unwrap();

        assert!(config.sender.dev_mode);
        assert_eq!(
            config.sender.repository_path.as_deref(),
            Some(Path::new("/srv/templates"))
        );
        assert_eq!(config.sender.files_pattern, "*.htm");
        assert_eq!(config.sender.template_engine, "verbatim");
        assert_eq!(config.sender.bounce_domain.as_deref(), Some("bounce.x.com"));
        // absent default keeps the standard content type
        assert_eq!(
            config.sender.defaults.content_type.as_deref(),
            Some(DEFAULT_CONTENT_TYPE)
        );

        assert_eq!(config.session.protocol.as_deref(), Some("smtps"));
        assert_eq!(config.session.port, Some(2465));
        assert_eq!(config.session.user.as_deref(), Some("mailer"));

        let defaults = config.sender.defaults.to_sender_defaults().unwrap();
        assert_eq!(defaults.from.unwrap().email.to_string(), "app@x.com");
        assert_eq!(defaults.reply_to.unwrap().len(), 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EmailConfig::from_toml_str("").unwrap();
        assert_eq!(config, EmailConfig::default());
        assert!(!config.sender.dev_mode);
        assert_eq!(config.sender.files_pattern, "*.html");
        assert_eq!(config.sender.template_engine, "tera");
        assert!(config.session.host.is_none());
    }

    #[test]
    fn test_invalid_defaults_are_rejected() {
        let plain = "[sender.defaults]\nenvelope_from = \"Named <b@x.com>\"\n";
        assert!(matches!(
            EmailConfig::from_toml_str(plain),
            Err(EmailError::EnvelopeAddress(_))
        ));

        let address = "[sender.defaults]\nfrom = \"not an address\"\n";
        assert!(matches!(
            EmailConfig::from_toml_str(address),
            Err(EmailError::AddressFormat { .. })
        ));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        for content in [
            "[sender]\ntemplate_engine = \"handlebars\"\n",
            "[session]\nprotocol = \"imap\"\n",
            "[session]\ntimeout_secs = 0\n",
            "[sender]\nmessage_id_domain = \"bad domain\"\n",
            "[sender\n",
        ] {
            assert!(
                matches!(EmailConfig::from_toml_str(content), Err(EmailError::Config(_))),
                "accepted {content:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EmailConfig::load_from_file(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, EmailConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = EmailConfig::from_toml_str(FULL_CONFIG).unwrap();
        config.save_to_file(&path).await.unwrap();

        let loaded = EmailConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_default_path_ends_with_postbox() {
        if let Some(path) = EmailConfig::default_path() {
            assert!(path.ends_with("postbox/config.toml"));
        }
    }
}
