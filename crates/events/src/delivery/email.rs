//! Operator alert email via SMTP.
//!
//! [`EmailDelivery`] wraps the `lettre` async SMTP transport. Configuration
//! is loaded from the environment; without `SMTP_HOST` and
//! `OPS_ALERT_EMAIL`, [`EmailConfig::from_env`] returns `None` and alerts
//! are only logged.

use async_trait::async_trait;

use crate::alerts::AlertNotifier;
use crate::bus::DomainEvent;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Why an operator alert email was not sent.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// The SMTP relay refused the connection, login or message.
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// `SMTP_FROM` or `OPS_ALERT_EMAIL` is not a valid mailbox.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The alert message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// STARTTLS submission port.
const DEFAULT_SMTP_PORT: u16 = 587;

const DEFAULT_FROM_ADDRESS: &str = "alerts@lumora.local";

/// SMTP settings for stuck-charge and other operator alerts.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Relay hostname (`SMTP_HOST`).
    pub smtp_host: String,
    /// Relay port, 587 unless `SMTP_PORT` says otherwise.
    pub smtp_port: u16,
    /// Sender mailbox for alerts.
    pub from_address: String,
    /// Login for relays that require authentication.
    pub smtp_user: Option<String>,
    /// Used only together with `smtp_user`.
    pub smtp_password: Option<String>,
    /// Mailbox that receives operational alerts.
    pub ops_alert_email: String,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable          | Required | Default               |
    /// |-------------------|----------|-----------------------|
    /// | `SMTP_HOST`       | yes      | --                    |
    /// | `OPS_ALERT_EMAIL` | yes      | --                    |
    /// | `SMTP_PORT`       | no       | `587`                 |
    /// | `SMTP_FROM`       | no       | `alerts@lumora.local` |
    /// | `SMTP_USER`       | no       | --                    |
    /// | `SMTP_PASSWORD`   | no       | --                    |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;
        let ops_alert_email = std::env::var("OPS_ALERT_EMAIL")
            .ok()
            .filter(|e| !e.is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            ops_alert_email,
        })
    }
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

pub struct EmailDelivery {
    config: EmailConfig,
}

/// Subject and plain-text body for an alert about `event`.
pub fn render_alert(event: &DomainEvent) -> (String, String) {
    let subject = format!("[Lumora ALERT] {}", event.event_type);
    let mut body = format!("Event: {}\nTime: {}\n", event.event_type, event.timestamp);
    if let Some(job_id) = event.job_id {
        body.push_str(&format!("Job: {job_id}\n"));
    }
    if let Some(user_id) = event.user_id {
        body.push_str(&format!("User: {user_id}\n"));
    }
    body.push_str(&format!(
        "Details: {}\n",
        serde_json::to_string_pretty(&event.payload).unwrap_or_default()
    ));
    (subject, body)
}

impl EmailDelivery {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub async fn deliver(&self, to_email: &str, event: &DomainEvent) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let (subject, body) = render_alert(event);

        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport_builder.build().send(email).await?;

        tracing::info!(to = to_email, event_type = %event.event_type, "Alert email sent");
        Ok(())
    }
}

#[async_trait]
impl AlertNotifier for EmailDelivery {
    async fn notify(&self, event: &DomainEvent) -> Result<(), String> {
        self.deliver(&self.config.ops_alert_email, event)
            .await
            .map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::event_types;

    #[test]
    fn alert_body_names_job_and_user() {
        let event = DomainEvent::new(event_types::CREDITS_COMPENSATION_FAILED)
            .with_job(12)
            .with_user(3)
            .with_payload(serde_json::json!({"reservationId": "r-1"}));
        let (subject, body) = render_alert(&event);
        assert_eq!(subject, "[Lumora ALERT] credits.compensation_failed");
        assert!(body.contains("Job: 12"));
        assert!(body.contains("User: 3"));
        assert!(body.contains("r-1"));
    }

    #[test]
    fn email_error_display_build() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
    }

    #[tokio::test]
    async fn bad_alert_mailbox_fails_before_connecting() {
        let delivery = EmailDelivery::new(EmailConfig {
            smtp_host: "smtp.invalid".into(),
            smtp_port: DEFAULT_SMTP_PORT,
            from_address: DEFAULT_FROM_ADDRESS.into(),
            smtp_user: None,
            smtp_password: None,
            ops_alert_email: "not-a-mailbox".into(),
        });
        let event = DomainEvent::new(event_types::CREDITS_COMPENSATION_FAILED);

        let err = delivery.notify(&event).await.unwrap_err();
        assert!(err.starts_with("Email address parse error"));
    }
}
