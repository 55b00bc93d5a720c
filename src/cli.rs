use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::EmailConfig;
use crate::email::sender::local_id_right;
use crate::email::{bounce, DeliveryMode, EmailSender, MessageId, Payload};

/// Postbox - template based email composition and delivery
#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(about = "Compose emails from templates and deliver them over SMTP")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dry run mode (print messages instead of sending them)
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a template and send it
    Send(SendArgs),

    /// Print a freshly generated message id
    MessageId {
        /// Right part of the id, defaults to the configured domain or host name
        #[arg(long)]
        domain: Option<String>,
    },

    /// Recover the message id from a bounce envelope address
    Correlate {
        /// Envelope address the bounce was delivered to
        address: String,

        /// Right part of the original message id
        #[arg(long)]
        domain: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Template name
    #[arg(short, long)]
    pub template: String,

    /// Template locale, e.g. en-US
    #[arg(short, long)]
    pub locale: Option<String>,

    /// To recipients
    #[arg(long)]
    pub to: Vec<String>,

    /// Cc recipients
    #[arg(long)]
    pub cc: Vec<String>,

    /// Bcc recipients
    #[arg(long)]
    pub bcc: Vec<String>,

    #[arg(short, long)]
    pub subject: Option<String>,

    /// Sender address
    #[arg(long)]
    pub from: Option<String>,

    /// Files to attach
    #[arg(long)]
    pub attach: Vec<PathBuf>,

    /// JSON file with the template payload
    #[arg(long)]
    pub data: Option<PathBuf>,
}

/// Command-line interface handler
pub struct CliHandler {
    config: EmailConfig,
}

impl CliHandler {
    /// Load configuration; dry run forces development mode
    pub async fn new(config_path: Option<PathBuf>, dry_run: bool) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => EmailConfig::default_path()
                .ok_or_else(|| anyhow!("Cannot find config directory"))?,
        };

        let mut config = EmailConfig::load_from_file(&path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
        if dry_run {
            config.sender.dev_mode = true;
        }

        Ok(Self { config })
    }

    pub fn with_config(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmailConfig {
        &self.config
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Send(args) => self.handle_send(args).await,
            Commands::MessageId { domain } => {
                println!("{}", self.message_id(domain.as_deref()));
                Ok(())
            }
            Commands::Correlate { address, domain } => {
                let id_right = self.id_right(domain.as_deref());
                let message_id = bounce::correlate(&address, &id_right)?;
                println!("{}", message_id);
                Ok(())
            }
        }
    }

    /// Fresh message id under the given or configured domain
    pub fn message_id(&self, domain: Option<&str>) -> MessageId {
        MessageId::generate(self.id_right(domain))
    }

    async fn handle_send(&self, args: SendArgs) -> Result<()> {
        let sender = EmailSender::from_config(&self.config)?;

        let mut draft = match &args.locale {
            Some(locale) => sender.draft_localized(locale, &args.template)?,
            None => sender.draft(&args.template)?,
        };

        if !args.to.is_empty() {
            draft = draft.to(&args.to)?;
        }
        if !args.cc.is_empty() {
            draft = draft.cc(&args.cc)?;
        }
        if !args.bcc.is_empty() {
            draft = draft.bcc(&args.bcc)?;
        }
        if let Some(subject) = &args.subject {
            draft = draft.subject(subject)?;
        }
        if let Some(from) = &args.from {
            draft = draft.from(from)?;
        }
        if !args.attach.is_empty() {
            draft = draft.attach(args.attach.clone())?;
        }

        let payload = match &args.data {
            Some(path) => load_payload(path).await?,
            None => Payload::empty(),
        };

        let receipt = draft.send_with(payload).await?;
        match receipt.mode {
            DeliveryMode::Sent => eprintln!(
                "✅ Sent {} to {} recipient(s)",
                receipt.message_id,
                receipt.recipients.len()
            ),
            DeliveryMode::Traced => eprintln!("📝 Traced {} (not sent)", receipt.message_id),
        }

        Ok(())
    }

    fn id_right(&self, domain: Option<&str>) -> String {
        domain
            .map(str::to_string)
            .or_else(|| self.config.sender.message_id_domain.clone())
            .unwrap_or_else(local_id_right)
    }
}

async fn load_payload(path: &Path) -> Result<Payload> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse payload {}", path.display()))?;
    Ok(Payload::data(&value)?)
}
