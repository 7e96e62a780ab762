//! SMTP delivery (STARTTLS relay, e.g. smtp.gmail.com:587).

use super::{DeliveryChannel, DELIVERY_BODY};
use crate::token::IssuedToken;
use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Default subject line for delivered images.
pub const DEFAULT_SUBJECT: &str = "Your authentication image";

pub struct SmtpDelivery {
    host: String,
    port: u16,
    credentials: Credentials,
    from: Mailbox,
    subject: String,
}

impl SmtpDelivery {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
        subject: &str,
    ) -> Result<Self> {
        let from: Mailbox = from
            .parse()
            .with_context(|| format!("Invalid sender address '{from}'"))?;

        Ok(Self {
            host: host.to_string(),
            port,
            credentials: Credentials::new(username.to_string(), password.to_string()),
            from,
            subject: subject.to_string(),
        })
    }

    fn transport(&self) -> Result<SmtpTransport> {
        Ok(SmtpTransport::starttls_relay(&self.host)
            .with_context(|| format!("Failed to configure SMTP relay {}", self.host))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build())
    }

    fn build_message(&self, issued: &IssuedToken) -> Result<Message> {
        let to: Mailbox = issued
            .identity
            .parse()
            .with_context(|| format!("Invalid recipient address '{}'", issued.identity))?;
        let png = ContentType::parse("image/png").context("Invalid attachment content type")?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(DELIVERY_BODY.to_string()))
                    .singlepart(
                        Attachment::new(issued.image_reference.clone()).body(issued.png.clone(), png),
                    ),
            )
            .context("Failed to build delivery email")
    }
}

impl DeliveryChannel for SmtpDelivery {
    fn name(&self) -> &str {
        "smtp"
    }

    fn deliver(&self, issued: &IssuedToken) -> Result<()> {
        let message = self.build_message(issued)?;
        self.transport()?
            .send(&message)
            .context("SMTP delivery failed")?;
        tracing::info!(identity = %issued.identity, "Authentication image emailed");
        Ok(())
    }
}
