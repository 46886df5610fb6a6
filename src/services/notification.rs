use crate::errors::AppError;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// Destination for operator-facing alerts (stuck tasks, price thresholds).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AppError>;
}

/// Writes alerts to the log only. Used when SMTP is not configured.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AppError> {
        warn!("📧 [NOTIFY] {} | {}", subject, message);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

impl SmtpSettings {
    /// `None` unless `SMTP_ENABLED=true` and every SMTP variable is present.
    pub fn from_env() -> Option<Self> {
        let enabled = env::var("SMTP_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";
        if !enabled {
            return None;
        }

        let from_name = env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Money Scheduler".to_string());
        Some(Self {
            host: env::var("SMTP_HOST").ok()?,
            port: env::var("SMTP_PORT").ok()?.parse().ok()?,
            username: env::var("SMTP_USERNAME").ok()?,
            password: env::var("SMTP_PASSWORD").ok()?,
            from: format!("{} <{}>", from_name, env::var("SMTP_FROM_EMAIL").ok()?),
            to: env::var("ALERT_EMAIL_TO").ok()?,
        })
    }
}

pub struct EmailNotifier {
    settings: SmtpSettings,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(settings: SmtpSettings) -> Result<Self, AppError> {
        let creds = Credentials::new(settings.username.clone(), settings.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| AppError::External(format!("Failed to create SMTP transport: {}", e)))?
            .port(settings.port)
            .credentials(creds)
            .build();
        Ok(Self { settings, mailer })
    }
}

#[async_trait]
impl NotificationSink for EmailNotifier {
    async fn notify(&self, subject: &str, message: &str) -> Result<(), AppError> {
        let from = self
            .settings
            .from
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid from address: {}", e)))?;
        let to = self
            .settings
            .to
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid to address: {}", e)))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(message.to_string()),
            )
            .map_err(|e| AppError::External(format!("Failed to build email: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| AppError::External(format!("SMTP send failed: {}", e)))?;

        info!("✅ Alert email sent to {}: {}", self.settings.to, subject);
        Ok(())
    }
}

/// SMTP when configured, otherwise log-only.
pub fn notifier_from_env() -> Arc<dyn NotificationSink> {
    match SmtpSettings::from_env() {
        Some(settings) => match EmailNotifier::new(settings) {
            Ok(notifier) => {
                info!("📧 Alerts will be delivered by email");
                Arc::new(notifier)
            }
            Err(e) => {
                warn!("⚠️  SMTP setup failed ({}), falling back to log alerts", e);
                Arc::new(LogNotifier)
            }
        },
        None => {
            info!("📧 SMTP disabled, alerts go to the log");
            Arc::new(LogNotifier)
        }
    }
}
