//! Outbound code and link delivery
//!
//! Delivery is fire-and-forget: flows hand a [`Notification`] over after
//! their writes are committed and never wait on the transport.

use serde::Serialize;
use tracing::{error, info};

/// What the recipient is being asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SignupVerification,
    LoginOtp,
    PasswordReset,
}

/// Message handed to the delivery service
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub code: u32,
    pub link: Option<String>,
    pub link_id: Option<uuid::Uuid>,
    pub expires_in_minutes: i64,
}

/// Email/SMS delivery collaborator
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: Notification);
}

/// Writes a delivery line to the log and nothing else
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: Notification) {
        info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            has_link = notification.link.is_some(),
            "Notification queued"
        );
    }
}

/// Posts notifications as JSON to a delivery webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn deliver(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let kind = notification.kind;
            match client.post(&url).json(&notification).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(?kind, "Notification delivered");
                }
                Ok(resp) => error!(?kind, status = %resp.status(), "Notification rejected"),
                Err(e) => error!(?kind, "Notification delivery failed: {}", e),
            }
        });
    }
}
