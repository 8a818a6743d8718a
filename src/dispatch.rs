//! Notification delivery.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{EmailConfig, SmtpConfig};
use crate::dedup::NotificationEvent;
use crate::mailer::{Mailer, OutgoingMessage};
use crate::stats::RunStats;
use crate::store::IdentityStore;
use crate::template::{CompiledTemplate, TemplateEngine};
use crate::Result;

/// Compiled templates for the parts of a notification email.
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    /// `From` mailbox.
    pub sender: CompiledTemplate,
    pub subject: CompiledTemplate,
    /// HTML body, with interpolated values escaped.
    pub body: CompiledTemplate,
}

impl MessageTemplates {
    /// Compile the sender, subject and body templates.
    pub fn compile(engine: &TemplateEngine, smtp: &SmtpConfig, email: &EmailConfig) -> Result<Self> {
        Ok(Self {
            sender: engine.compile(&smtp.sender)?,
            subject: engine.compile(&email.subject)?,
            body: engine.compile_html(&email.content)?,
        })
    }

    /// Render the message for one event.
    pub fn render(&self, event: &NotificationEvent, recipient: &str) -> Result<OutgoingMessage> {
        let context = event.context();
        Ok(OutgoingMessage {
            from: self.sender.render(&context)?,
            to: recipient.to_string(),
            subject: self.subject.render(&context)?,
            html_body: self.body.render(&context)?,
        })
    }
}

/// Shared state of the delivery workers.
struct Delivery {
    mailer: Arc<dyn Mailer>,
    store: Arc<dyn IdentityStore>,
    templates: Arc<MessageTemplates>,
    recipient: String,
    stats: Arc<RunStats>,
}

impl Delivery {
    async fn deliver(&self, event: NotificationEvent) {
        let message = match self.templates.render(&event, &self.recipient) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to render email for {}: {}", event.source.name, e);
                self.stats.record_failed_delivery();
                return;
            }
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                self.store.mark(&event.identity);
                self.stats.record_delivered();
                info!(
                    "sent feed email: {} / {}",
                    event.source.name,
                    event.item.title.as_deref().unwrap_or_default()
                );
            }
            Err(e) => {
                warn!("Failed to send email for {}: {}", event.source.name, e);
                self.stats.record_failed_delivery();
            }
        }
    }
}

/// Fixed pool of delivery workers sharing the notification queue.
///
/// Workers exit once every sender of the queue has been dropped and the
/// queue is empty.
pub struct NotificationDispatcher {
    workers: Vec<JoinHandle<()>>,
}

impl NotificationDispatcher {
    /// Spawn `jobs` workers reading from `receiver`.
    pub fn start(
        jobs: usize,
        receiver: mpsc::Receiver<NotificationEvent>,
        mailer: Arc<dyn Mailer>,
        store: Arc<dyn IdentityStore>,
        templates: Arc<MessageTemplates>,
        recipient: String,
        stats: Arc<RunStats>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let delivery = Arc::new(Delivery {
            mailer,
            store,
            templates,
            recipient,
            stats,
        });

        let workers = (0..jobs.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let delivery = Arc::clone(&delivery);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else {
                            break;
                        };
                        delivery.deliver(event).await;
                    }
                })
            })
            .collect();

        Self { workers }
    }

    /// Wait for every worker to finish.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!("Delivery worker panicked: {}", e);
            }
        }
    }
}
