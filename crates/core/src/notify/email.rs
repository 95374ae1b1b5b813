//! SMTP delivery via `lettre`.

use super::Notifier;
use crate::config::NotifyConfig;
use crate::error::NotifyError;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Message, SmtpTransport,
    Transport,
};
use tracing::info;

/// Sends reminder mails through an SMTP relay.
#[derive(Debug)]
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport from configuration.
    ///
    /// Port 465 uses implicit TLS, any other port STARTTLS unless TLS is
    /// disabled. Credentials come from `SMTP_USERNAME` and `SMTP_PASSWORD`
    /// when both are set.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let port = config.smtp_port.unwrap_or(if config.tls { 587 } else { 25 });
        let host = config.smtp_host.as_str();

        let mut builder = if port == 465 {
            SmtpTransport::relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if config.tls {
            SmtpTransport::starttls_relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            SmtpTransport::builder_dangerous(host).port(port)
        };

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(&email)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        info!(channel = "email", recipient, subject, "reminder delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            smtp_host: "smtp.example.com".to_string(),
            ..NotifyConfig::default()
        }
    }

    #[test]
    fn test_from_config_starttls() {
        let notifier = SmtpNotifier::from_config(&config());
        assert!(notifier.is_ok());
        assert_eq!(notifier.unwrap().channel_name(), "email");
    }

    #[test]
    fn test_from_config_implicit_tls_port() {
        let mut config = config();
        config.smtp_port = Some(465);
        assert!(SmtpNotifier::from_config(&config).is_ok());
    }

    #[test]
    fn test_from_config_plaintext() {
        let mut config = config();
        config.tls = false;
        assert!(SmtpNotifier::from_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_sender() {
        let mut config = config();
        config.from = "bad-address".to_string();
        let err = SmtpNotifier::from_config(&config).unwrap_err().to_string();
        assert!(err.contains("Configuration error"), "got: {err}");
    }

    #[test]
    fn test_invalid_recipient_is_rejected_before_delivery() {
        let notifier = SmtpNotifier::from_config(&config()).unwrap();
        let result = notifier.send("not-an-address", "Subject", "Body");
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }
}
