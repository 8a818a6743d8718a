//! Outgoing mail transport.

use std::sync::LazyLock;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use tracing::debug;

use crate::config::SmtpConfig;
use crate::{FeedmailError, Result};

/// A rendered notification email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// `From` mailbox, e.g. `Example News <feeds@example.com>`.
    pub from: String,
    /// `To` mailbox.
    pub to: String,
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

/// Delivers outgoing messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message. An error means the message was not accepted.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// SMTP mailer using STARTTLS when the server offers it.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a mailer from the `[smtp]` configuration. No connection is
    /// made until the first message is sent.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let (host, port) = config.host_port()?;

        let tls = TlsParameters::builder(host.clone())
            .dangerous_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .map_err(|e| FeedmailError::Config(format!("smtp TLS setup failed: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
            .port(port)
            .tls(Tls::Opportunistic(tls));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

/// Angle-bracketed address of a `Name <user@host>` mailbox.
static ANGLE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>@]+@[^<>]+)>\s*$").expect("valid regex"));

/// Split a rendered sender into display name and address.
///
/// The display name is taken verbatim, so feed titles containing commas,
/// colons or parentheses still produce a valid `From` header.
fn parse_sender(sender: &str) -> Result<Mailbox> {
    let invalid = |e: AddressError| FeedmailError::Delivery(format!("invalid sender '{sender}': {e}"));

    let Some(captures) = ANGLE_ADDRESS.captures(sender) else {
        let address: Address = sender.trim().parse().map_err(invalid)?;
        return Ok(Mailbox::new(None, address));
    };

    let address: Address = captures[1].trim().parse().map_err(invalid)?;
    let name = sender[..captures.get(0).map_or(0, |m| m.start())].trim();
    let name = (!name.is_empty()).then(|| name.trim_matches('"').to_string());
    Ok(Mailbox::new(name, address))
}

/// Build the MIME message for an outgoing notification.
pub fn build_message(message: &OutgoingMessage) -> Result<Message> {
    let from = parse_sender(&message.from)?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| FeedmailError::Delivery(format!("invalid recipient '{}': {e}", message.to)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(message.html_body.clone())
        .map_err(|e| FeedmailError::Delivery(format!("failed to build message: {e}")))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let email = build_message(message)?;
        debug!("Sending '{}' to {}", message.subject, message.to);

        self.transport
            .send(email)
            .await
            .map_err(|e| FeedmailError::Delivery(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}
