//! Configuration module for feedmail.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::feed::Source;
use crate::{FeedmailError, Result};

/// Environment variable that supplies the SMTP password when the config
/// file leaves it empty.
pub const SMTP_PASSWORD_ENV: &str = "FEEDMAIL_SMTP_PASSWORD";

/// Default HTML body template for notification emails.
pub const DEFAULT_EMAIL_CONTENT: &str = r#"<h2><a href="{{item.link}}">{{item.title}}</a></h2>
{{#with (or item.content item.description)}}
  {{#if (ishtml this)}}
    {{this | noescape}}
  {{else}}
    <p style="white-space:pre-wrap">{{this}}</p>
  {{/if}}
{{/with}}
"#;

/// Identity store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory of the identity store. Must contain a `.feedmail` marker file.
    #[serde(default)]
    pub path: String,
    /// Template producing the identity of a feed.
    #[serde(default = "default_feed_identity")]
    pub feed_identity: String,
    /// Template producing the identity of an item.
    #[serde(default = "default_item_identity")]
    pub item_identity: String,
}

fn default_feed_identity() -> String {
    "{{or feed.feed_link source.url source.name}}".to_string()
}

fn default_item_identity() -> String {
    "{{or feed.feed_link source.url source.name}}|{{or item.guid item.link}}".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            feed_identity: default_feed_identity(),
            item_identity: default_item_identity(),
        }
    }
}

/// SMTP delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    /// Server address in `host:port` form.
    #[serde(default)]
    pub address: String,
    /// Template producing the `From` mailbox, e.g. `{{feed.title}} <feeds@example.com>`.
    #[serde(default)]
    pub sender: String,
    /// Recipient mailbox.
    #[serde(default)]
    pub recipient: String,
    /// Username for SMTP authentication. Empty disables authentication.
    #[serde(default)]
    pub username: String,
    /// Password for SMTP authentication.
    #[serde(default)]
    pub password: String,
    /// Accept invalid TLS certificates from the SMTP server.
    #[serde(default)]
    pub skip_tls_verify: bool,
    /// Number of delivery workers.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_jobs() -> usize {
    4
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            sender: String::new(),
            recipient: String::new(),
            username: String::new(),
            password: String::new(),
            skip_tls_verify: false,
            jobs: default_jobs(),
        }
    }
}

impl SmtpConfig {
    /// Split the configured address into host and port.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let (host, port) = self.address.rsplit_once(':').ok_or_else(|| {
            FeedmailError::Config(format!(
                "can't parse smtp.address '{}': expected host:port",
                self.address
            ))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(FeedmailError::Config(format!(
                "can't parse smtp.address '{}': missing host",
                self.address
            )));
        }
        let port = port.parse::<u16>().map_err(|e| {
            FeedmailError::Config(format!("can't parse smtp.address '{}': {e}", self.address))
        })?;
        Ok((host.to_string(), port))
    }
}

/// Notification email configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    /// Subject template.
    #[serde(default = "default_email_subject")]
    pub subject: String,
    /// HTML body template.
    #[serde(default = "default_email_content")]
    pub content: String,
}

fn default_email_subject() -> String {
    "{{item.title | nonewlines}}".to_string()
}

fn default_email_content() -> String {
    DEFAULT_EMAIL_CONTENT.to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject: default_email_subject(),
            content: default_email_content(),
        }
    }
}

/// Command source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecConfig {
    /// Number of command workers.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
        }
    }
}

/// Network fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Minimum delay before each fetch against the same host, in milliseconds.
    #[serde(default = "default_fetch_delay")]
    pub delay_ms: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Capacity of each ingestion queue and of the notification queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_fetch_delay() -> u64 {
    2000
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_feed_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    concat!("feedmail/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_fetch_delay(),
            timeout_secs: default_fetch_timeout(),
            max_feed_size_bytes: default_max_feed_size(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file, written in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One `[[feeds]]` entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct FeedConfig {
    /// Display name used in logs and templates.
    pub name: String,
    /// Feed URL for network sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Accept invalid TLS certificates for this feed.
    #[serde(default)]
    pub skip_tls_verify: bool,
    /// Command and arguments for command sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Identity store configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// SMTP configuration.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Email templates.
    #[serde(default)]
    pub email: EmailConfig,
    /// Command source configuration.
    #[serde(default)]
    pub exec: ExecConfig,
    /// Network fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Configured feeds.
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    /// Load configuration from a TOML file. A path of `-` reads stdin.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = if path == Path::new("-") {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            content
        } else {
            std::fs::read_to_string(path)?
        };
        Self::parse(&content)
    }

    /// Load a configuration file, apply environment overrides and validate it.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, checking only what `--init-storage` needs.
    pub fn load_storage_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load(path)?;
        config.validate_storage()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedmailError::Config(format!("config parse error: {e}")))
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FeedmailError::Config(format!("config encode error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDMAIL_SMTP_PASSWORD`: SMTP password, used when `smtp.password` is empty
    pub fn apply_env_overrides(&mut self) {
        if self.smtp.password.is_empty() {
            if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV) {
                self.smtp.password = password;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Template syntax is checked later, when the templates are compiled.
    pub fn validate(&self) -> Result<()> {
        self.validate_storage()?;
        if self.smtp.sender.is_empty() {
            return Err(FeedmailError::Config("smtp.sender is required".to_string()));
        }
        if self.smtp.recipient.is_empty() {
            return Err(FeedmailError::Config("smtp.recipient is required".to_string()));
        }
        self.smtp.host_port()?;
        if self.smtp.jobs == 0 {
            return Err(FeedmailError::Config("smtp.jobs must be at least 1".to_string()));
        }
        if self.exec.jobs == 0 {
            return Err(FeedmailError::Config("exec.jobs must be at least 1".to_string()));
        }
        if self.fetch.queue_capacity == 0 {
            return Err(FeedmailError::Config(
                "fetch.queue_capacity must be at least 1".to_string(),
            ));
        }
        self.sources()?;
        Ok(())
    }

    /// Validate the `[storage]` section alone.
    pub fn validate_storage(&self) -> Result<()> {
        if self.storage.path.is_empty() {
            return Err(FeedmailError::Config("storage.path is required".to_string()));
        }
        Ok(())
    }

    /// Convert the `[[feeds]]` entries into sources.
    pub fn sources(&self) -> Result<Vec<Source>> {
        self.feeds.iter().map(Source::try_from).collect()
    }
}
