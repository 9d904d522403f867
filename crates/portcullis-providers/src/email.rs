//! Transactional email.
//!
//! Verification and password-reset codes are delivered through an
//! [`EmailSender`]. The SMTP sender is the production default; the console
//! sender writes messages to the log for local development.

use async_trait::async_trait;
use tracing::info;

use crate::error::ProviderResult;

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Sender address.
    pub from: String,

    /// Recipient address.
    pub to: String,

    /// Subject line.
    pub subject: String,

    /// Plain-text body.
    pub body: String,
}

impl EmailMessage {
    /// Email carrying an email-verification code.
    pub fn verification_code(from: &str, to: &str, code: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: "Your verification code".to_string(),
            body: format!(
                "Your verification code is: {}\n\n\
                 Enter this code to verify your email address.\n\n\
                 If you didn't request this, you can safely ignore this email.",
                code
            ),
        }
    }

    /// Email carrying a password-reset code.
    pub fn password_reset_code(from: &str, to: &str, code: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: "Password reset code".to_string(),
            body: format!(
                "Your password reset code is: {}\n\n\
                 Enter this code to reset your password.\n\n\
                 If you didn't request this, you can safely ignore this email.",
                code
            ),
        }
    }
}

/// Delivers transactional email.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Hand `message` to the mail transport.
    async fn send(&self, message: &EmailMessage) -> ProviderResult<()>;
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct ConsoleEmailSender;

#[async_trait]
impl EmailSender for ConsoleEmailSender {
    async fn send(&self, message: &EmailMessage) -> ProviderResult<()> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Email (console sender)"
        );
        Ok(())
    }
}

#[cfg(feature = "smtp")]
pub use smtp::{SmtpConfig, SmtpEmailSender};

#[cfg(feature = "smtp")]
mod smtp {
    use async_trait::async_trait;
    use lettre::{
        message::{header::ContentType, Mailbox},
        transport::smtp::authentication::Credentials,
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    };
    use secrecy::{ExposeSecret, SecretString};
    use tracing::{info, instrument};

    use super::{EmailMessage, EmailSender};
    use crate::error::{ProviderError, ProviderResult};

    /// SMTP relay settings.
    #[derive(Debug, Clone)]
    pub struct SmtpConfig {
        /// SMTP server host
        pub host: String,
        /// SMTP server port (typically 587 for STARTTLS)
        pub port: u16,
        /// SMTP username
        pub username: String,
        /// SMTP password
        pub password: SecretString,
    }

    impl SmtpConfig {
        /// Create config from environment variables.
        ///
        /// Required:
        /// - PORTCULLIS_SMTP_HOST
        /// - PORTCULLIS_SMTP_USERNAME
        /// - PORTCULLIS_SMTP_PASSWORD
        ///
        /// Optional:
        /// - PORTCULLIS_SMTP_PORT (default: 587)
        pub fn from_env() -> Option<Self> {
            fn get_env(key: &str) -> Option<String> {
                std::env::var(key).ok().filter(|s| !s.is_empty())
            }

            Some(Self {
                host: get_env("PORTCULLIS_SMTP_HOST")?,
                username: get_env("PORTCULLIS_SMTP_USERNAME")?,
                password: SecretString::new(get_env("PORTCULLIS_SMTP_PASSWORD")?),
                port: std::env::var("PORTCULLIS_SMTP_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(587),
            })
        }
    }

    /// [`EmailSender`] that relays through an SMTP server.
    pub struct SmtpEmailSender {
        transport: AsyncSmtpTransport<Tokio1Executor>,
    }

    impl SmtpEmailSender {
        /// Create a sender using STARTTLS against `config.host`.
        pub fn new(config: SmtpConfig) -> ProviderResult<Self> {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().clone(),
            );

            let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| {
                    ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
                })?
                .port(config.port)
                .credentials(creds)
                .build();

            info!(host = %config.host, port = config.port, "SMTP transport configured");
            Ok(Self { transport })
        }
    }

    #[async_trait]
    impl EmailSender for SmtpEmailSender {
        #[instrument(skip(self, message), fields(to = %message.to))]
        async fn send(&self, message: &EmailMessage) -> ProviderResult<()> {
            let from: Mailbox = message
                .from
                .parse()
                .map_err(|e| ProviderError::Configuration(format!("Invalid from address: {}", e)))?;
            let to: Mailbox = message
                .to
                .parse()
                .map_err(|e| ProviderError::EmailDelivery(format!("Invalid recipient: {}", e)))?;

            let email = Message::builder()
                .from(from)
                .to(to)
                .subject(&message.subject)
                .header(ContentType::TEXT_PLAIN)
                .body(message.body.clone())
                .map_err(|e| ProviderError::EmailDelivery(format!("Failed to build email: {}", e)))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| ProviderError::EmailDelivery(e.to_string()))?;

            info!("Email sent");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_messages_carry_code() {
        let verify = EmailMessage::verification_code("noreply@mail.example.com", "a@example.com", "ABC123");
        assert!(verify.body.contains("ABC123"));
        assert_eq!(verify.to, "a@example.com");

        let reset = EmailMessage::password_reset_code("noreply@mail.example.com", "a@example.com", "XYZ");
        assert!(reset.body.contains("XYZ"));
        assert_eq!(reset.subject, "Password reset code");
    }

    #[tokio::test]
    async fn test_console_sender_succeeds() {
        let message = EmailMessage::verification_code("from@example.com", "to@example.com", "1");
        assert!(ConsoleEmailSender.send(&message).await.is_ok());
    }
}
