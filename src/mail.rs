use reqwest::Url;
use thiserror::Error;
use tracing::info;

use crate::services::tokens::TOKEN_TTL_MINUTES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub link: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid link base url: {0}")]
    InvalidLink(String),
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Outgoing mail transport.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            link = %message.link,
            "mail queued"
        );
        Ok(())
    }
}

pub fn verification_email(base_url: &str, to: &str, token: &str) -> Result<MailMessage, MailError> {
    let link = token_link(base_url, "/api/auth/verify-email", token)?;
    Ok(MailMessage {
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Open the link below to verify your email address:\n\n{link}\n\n\
             The link expires in {TOKEN_TTL_MINUTES} minutes. \
             If you did not request this, ignore this email."
        ),
        link,
    })
}

pub fn password_reset_email(base_url: &str, to: &str, token: &str) -> Result<MailMessage, MailError> {
    let link = token_link(base_url, "/auth/resetpassword", token)?;
    Ok(MailMessage {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "Open the link below to reset your password:\n\n{link}\n\n\
             The link expires in {TOKEN_TTL_MINUTES} minutes. \
             If you did not request this, ignore this email."
        ),
        link,
    })
}

fn token_link(base_url: &str, path: &str, token: &str) -> Result<String, MailError> {
    let base = format!("{}{}", base_url.trim_end_matches('/'), path);
    Url::parse_with_params(&base, &[("token", token)])
        .map(|url| url.to_string())
        .map_err(|err| MailError::InvalidLink(format!("{base}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_link_points_at_api() {
        let message = verification_email("http://localhost:3000/", "ana@example.com", "abc-_1").unwrap();
        assert_eq!(message.to, "ana@example.com");
        assert_eq!(
            message.link,
            "http://localhost:3000/api/auth/verify-email?token=abc-_1"
        );
        assert!(message.body.contains(&message.link));
        assert!(message.body.contains("60 minutes"));
    }

    #[test]
    fn reset_link_points_at_frontend_page() {
        let message = password_reset_email("https://subs.example.com", "ana@example.com", "xyz").unwrap();
        assert_eq!(
            message.link,
            "https://subs.example.com/auth/resetpassword?token=xyz"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            verification_email("not a url", "ana@example.com", "abc"),
            Err(MailError::InvalidLink(_))
        ));
    }

    #[test]
    fn log_mailer_accepts_everything() {
        let mailer: &dyn Mailer = &LogMailer;
        let message = verification_email("http://localhost:3000", "ana@example.com", "abc").unwrap();
        assert!(mailer.send(&message).is_ok());
    }
}
