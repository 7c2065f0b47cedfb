use std::sync::Arc;

use anyhow::{Context, Result};
use lettre::message::{Mailbox, Message, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{info, warn};

use crate::auth::VERIFICATION_CODE_MINUTES;

#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    /// Empty host means no SMTP: codes are logged instead of mailed.
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Sends verification codes. Without an SMTP host it only logs.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Option<Mailbox>,
}

impl Mailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        if settings.host.trim().is_empty() {
            warn!("SMTP host not configured; verification codes will be logged");
            return Ok(Self::disabled());
        }

        let from = settings
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid SMTP_FROM address '{}'", settings.from))?;

        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .context("Failed to configure SMTP transport")?
            .port(settings.port);

        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        info!("SMTP mailer using {}:{}", settings.host, settings.port);
        Ok(Self {
            transport: Some(Arc::new(builder.build())),
            from: Some(from),
        })
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            from: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn send_verification_code(&self, recipient: &str, username: &str, code: &str) -> Result<()> {
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            info!("Verification code for {} <{}>: {}", username, recipient, code);
            return Ok(());
        };

        let body = verification_body(username, code);

        let email = Message::builder()
            .from(from.clone())
            .to(recipient.parse().with_context(|| format!("Invalid recipient '{}'", recipient))?)
            .subject("Your verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        transport.send(email).await.context("SMTP send failed")?;
        info!("Sent verification code to user {}", username);
        Ok(())
    }
}

fn verification_body(username: &str, code: &str) -> String {
    format!(
        "Hi {username},\n\nYour verification code is {code}. It expires in \
         {VERIFICATION_CODE_MINUTES} minutes.\n\n\
         If you did not create an account, ignore this email."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_mailer_logs_instead_of_sending() {
        let mailer = Mailer::new(&SmtpSettings::default()).unwrap();
        assert!(!mailer.is_enabled());
        mailer
            .send_verification_code("an@campus.edu", "an", "123456")
            .await
            .unwrap();
    }

    #[test]
    fn bad_from_address_is_a_config_error() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            from: "not an address".into(),
            ..Default::default()
        };
        assert!(Mailer::new(&settings).is_err());
    }

    #[test]
    fn body_states_the_real_expiry() {
        let body = verification_body("an", "123456");
        assert!(body.contains("123456"));
        assert!(body.contains(&format!("expires in {VERIFICATION_CODE_MINUTES} minutes")));
    }
}
