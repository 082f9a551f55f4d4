//! Outbound email delivery.
//!
//! # Responsibility
//! - Define the `Mailer` seam used by the dispatcher and manual trigger.
//! - Deliver messages over an SMTP relay, or log them in dry-run mode.
//!
//! # Invariants
//! - `send` returns `Ok(())` only after the transport accepted the message.
//! - An empty or malformed recipient fails before any transport I/O.

use crate::config::{SmtpSettings, SmtpTls};
use crate::service::render::RenderedReminder;
use lettre::address::AddressError;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One fully rendered email addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

impl OutboundEmail {
    pub fn from_rendered(to: impl Into<String>, rendered: RenderedReminder) -> Self {
        Self {
            to: to.into(),
            subject: rendered.subject,
            text_body: rendered.text_body,
            html_body: rendered.html_body,
        }
    }
}

#[derive(Debug)]
pub enum MailError {
    /// Recipient is blank or not a valid mailbox.
    InvalidRecipient(String),
    InvalidSender(AddressError),
    Build(lettre::error::Error),
    Transport(lettre::transport::smtp::Error),
    /// Failure reported by a non-SMTP mailer implementation.
    Rejected(String),
}

impl Display for MailError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRecipient(reason) => write!(f, "invalid recipient: {reason}"),
            Self::InvalidSender(err) => write!(f, "invalid sender address: {err}"),
            Self::Build(err) => write!(f, "failed to build message: {err}"),
            Self::Transport(err) => write!(f, "smtp transport error: {err}"),
            Self::Rejected(reason) => write!(f, "mail rejected: {reason}"),
        }
    }
}

impl Error for MailError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidSender(err) => Some(err),
            Self::Build(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::InvalidRecipient(_) | Self::Rejected(_) => None,
        }
    }
}

/// Delivers one email per call.
pub trait Mailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

impl<T: Mailer + ?Sized> Mailer for &T {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        (**self).send(email)
    }
}

impl<T: Mailer + ?Sized> Mailer for Box<T> {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        (**self).send(email)
    }
}

/// Parses a recipient address, rejecting blanks.
pub fn parse_recipient(address: &str) -> Result<Mailbox, MailError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(MailError::InvalidRecipient("address is empty".to_string()));
    }
    trimmed
        .parse::<Mailbox>()
        .map_err(|err| MailError::InvalidRecipient(err.to_string()))
}

/// SMTP relay mailer built once at startup and shared by reference.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(MailError::InvalidSender)?;

        let mut builder = match settings.tls {
            SmtpTls::Wrapper => {
                SmtpTransport::relay(&settings.host).map_err(MailError::Transport)?
            }
            SmtpTls::StartTls => {
                SmtpTransport::starttls_relay(&settings.host).map_err(MailError::Transport)?
            }
            SmtpTls::None => SmtpTransport::builder_dangerous(&settings.host),
        };
        if let Some(port) = settings.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.timeout(Some(settings.timeout)).build(),
            from,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, MailError> {
        let to = parse_recipient(&email.to)?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(MailError::Build)
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        self.transport.send(&message).map_err(MailError::Transport)?;
        Ok(())
    }
}

/// Logs instead of delivering; used for local runs without a relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunMailer;

impl Mailer for DryRunMailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        parse_recipient(&email.to)?;
        info!(
            "event=mail_dry_run module=mailer status=ok subject_chars={} text_chars={}",
            email.subject.chars().count(),
            email.text_body.chars().count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(tls: SmtpTls) -> SmtpSettings {
        SmtpSettings {
            host: "localhost".to_string(),
            port: Some(2525),
            tls,
            username: None,
            password: None,
            from: "Taskbell <bell@example.com>".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            to: to.to_string(),
            subject: "subject".to_string(),
            text_body: "text".to_string(),
            html_body: "<p>html</p>".to_string(),
        }
    }

    #[test]
    fn parse_recipient_rejects_blank_and_malformed_addresses() {
        assert!(matches!(
            parse_recipient("   "),
            Err(MailError::InvalidRecipient(_))
        ));
        assert!(matches!(
            parse_recipient("not-an-address"),
            Err(MailError::InvalidRecipient(_))
        ));
        assert!(parse_recipient(" u1@x.com ").is_ok());
    }

    #[test]
    fn smtp_mailer_rejects_bad_sender() {
        let mut bad = settings(SmtpTls::None);
        bad.from = "nobody".to_string();
        assert!(matches!(
            SmtpMailer::from_settings(&bad),
            Err(MailError::InvalidSender(_))
        ));
    }

    #[test]
    fn smtp_mailer_builds_multipart_message() {
        let mailer = SmtpMailer::from_settings(&settings(SmtpTls::None)).unwrap();
        let message = mailer.build_message(&email("u1@x.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: u1@x.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn dry_run_mailer_validates_recipient() {
        assert!(DryRunMailer.send(&email("u1@x.com")).is_ok());
        assert!(DryRunMailer.send(&email("")).is_err());
    }
}
