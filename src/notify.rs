//! Operator notification over local mail.
//!
//! Best-effort by design: a notification that cannot be delivered is logged
//! and dropped, never retried, and never fails the pair it reports on.

use crate::config::MailConfig;
use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::{Message, SmtpTransport, Transport};
use tracing::warn;

pub trait Notifier {
    fn notify_success(&self, version: &str, target: &str);
    fn notify_failure(&self, version: &str, target: &str, error: &anyhow::Error);
}

pub struct MailNotifier {
    mail: MailConfig,
    download_base: String,
}

impl MailNotifier {
    pub fn new(mail: MailConfig, download_base: impl Into<String>) -> Self {
        Self {
            mail,
            download_base: download_base.into(),
        }
    }

    fn send(&self, subject: String, body: String) {
        if let Err(e) = self.try_send(subject, body) {
            warn!("notification not delivered: {e:#}");
        }
    }

    fn try_send(&self, subject: String, body: String) -> Result<()> {
        let from: Mailbox = self
            .mail
            .from
            .parse()
            .with_context(|| format!("parsing sender address '{}'", self.mail.from))?;
        let to: Mailbox = self
            .mail
            .to
            .parse()
            .with_context(|| format!("parsing recipient address '{}'", self.mail.to))?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body)
            .context("assembling mail")?;

        let transport = SmtpTransport::builder_dangerous(&self.mail.smtp_host).build();
        transport
            .send(&message)
            .with_context(|| format!("submitting mail via '{}'", self.mail.smtp_host))?;
        Ok(())
    }
}

impl Notifier for MailNotifier {
    fn notify_success(&self, version: &str, target: &str) {
        self.send(
            format!("Built kernel {version} for target {target}"),
            format!("{}/{version}", self.download_base.trim_end_matches('/')),
        );
    }

    fn notify_failure(&self, version: &str, target: &str, error: &anyhow::Error) {
        self.send(
            format!("Failed to build kernel {version} for target {target}"),
            format!("{error:#}"),
        );
    }
}
