use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::errors::AppError;
use crate::models::User;

// ==============================================================================
// Notification Sink
// ==============================================================================

/// Told when a user's provider credential was rejected and has been cleared.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn credential_invalidated(&self, user: &User) -> Result<(), AppError>;
}

const CREDENTIAL_INVALIDATED_SUBJECT: &str = "🔌 Sua conexão bancária precisa ser refeita";

fn credential_invalidated_text(user: &User) -> String {
    format!(
        "Olá {},\n\nNão conseguimos acessar seus dados bancários porque a autorização da sua conexão \
         foi revogada ou expirou. As sincronizações automáticas foram pausadas.\n\n\
         Reconecte sua instituição no aplicativo para voltar a receber suas contas, transações e faturas.",
        user.name
    )
}

// ==============================================================================
// Log-only Sink
// ==============================================================================

/// Writes the notification to the log. Used when SMTP is not configured.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn credential_invalidated(&self, user: &User) -> Result<(), AppError> {
        info!(
            "📧 [notification] {} -> {} ({})",
            CREDENTIAL_INVALIDATED_SUBJECT, user.email, user.id
        );
        Ok(())
    }
}

// ==============================================================================
// Email Sink
// ==============================================================================

pub struct EmailNotificationSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailNotificationSink {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| AppError::External(format!("Failed to create SMTP transport: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        info!("🔌 SMTP notifications enabled via {}:{}", config.host, config.port);

        Ok(Self {
            mailer,
            from: format!("{} <{}>", config.from_name, config.from_email),
        })
    }

    fn build_message(&self, user: &User) -> Result<Message, AppError> {
        let from = self
            .from
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid from address: {}", e)))?;
        let to = user
            .email
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid to address: {}", e)))?;

        let text = credential_invalidated_text(user);
        let html = format!("<p>{}</p>", text.replace("\n\n", "</p><p>").replace('\n', "<br>"));

        Message::builder()
            .from(from)
            .to(to)
            .subject(CREDENTIAL_INVALIDATED_SUBJECT)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html)),
            )
            .map_err(|e| AppError::External(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl NotificationSink for EmailNotificationSink {
    async fn credential_invalidated(&self, user: &User) -> Result<(), AppError> {
        let email = self.build_message(user)?;

        match self.mailer.send(email).await {
            Ok(_) => {
                info!("✅ Credential notice sent to {}", user.email);
                Ok(())
            }
            Err(e) => {
                warn!("❌ SMTP error sending credential notice to {}: {}", user.email, e);
                Err(AppError::External(format!("SMTP send failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_mentions_user_name() {
        let user = User::new("ana@example.com".into(), "Ana".into(), None);
        assert!(credential_invalidated_text(&user).starts_with("Olá Ana"));
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let user = User::new("ana@example.com".into(), "Ana".into(), Some("item-1".into()));
        assert!(LogNotificationSink.credential_invalidated(&user).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_message_builds() {
        let sink = EmailNotificationSink::new(&SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "user".into(),
            password: "secret".into(),
            from_email: "noreply@example.com".into(),
            from_name: "Finsync".into(),
        })
        .unwrap();
        let user = User::new("ana@example.com".into(), "Ana".into(), None);
        assert!(sink.build_message(&user).is_ok());
    }
}
