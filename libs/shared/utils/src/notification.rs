use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use shared_models::{Appointment, Payment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
    AppointmentConfirmed,
}

/// Everything the mail/PDF service needs to render a receipt or a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub appointment: Appointment,
    pub payment: Option<Payment>,
    pub qr_image: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Sends in the background. Failures are logged and never reach the caller.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        let appointment_id = notification.appointment.id;
        let kind = notification.kind;
        match notifier.send(&notification).await {
            Ok(()) => debug!("Notification {:?} sent for appointment {}", kind, appointment_id),
            Err(e) => warn!(
                "Notification {:?} for appointment {} failed: {}",
                kind, appointment_id, e
            ),
        }
    });
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            kind = ?notification.kind,
            appointment_id = notification.appointment.id,
            patient_id = notification.appointment.patient_id,
            token_number = ?notification.appointment.token_number,
            "Notification ready for delivery"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to the notification service.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self.client.post(&self.url).json(notification).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Notification service error ({}): {}", status, body));
        }
        Ok(())
    }
}
