//! Outgoing account mail.

use crate::error::Result;

/// Email verification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMail {
    /// Recipient address.
    pub to: String,
    /// Recipient username.
    pub username: String,
    /// Link that confirms the address.
    pub link: String,
}

impl VerificationMail {
    /// Plain text body.
    pub fn body(&self) -> String {
        format!(
            "Welcome to MyBook, {}!\n\n\
             Please confirm your email address by opening the link below:\n{}\n\n\
             If you did not create an account, you can ignore this message.\n",
            self.username, self.link
        )
    }
}

/// Delivers account mail.
pub trait Mailer: Send + Sync {
    /// Send an email verification message.
    fn send_verification(&self, mail: &VerificationMail) -> Result<()>;
}

/// Mailer that writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_verification(&self, mail: &VerificationMail) -> Result<()> {
        tracing::info!(to = %mail.to, link = %mail.link, "Verification mail");
        tracing::debug!(body = %mail.body(), "Verification mail body");
        Ok(())
    }
}
