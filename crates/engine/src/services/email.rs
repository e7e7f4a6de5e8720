//! Email channel for pickup notifications.
//!
//! Uses SMTP via lettre for delivery with Askama HTML and plain-text templates.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use locker_pickup_core::Email;

use super::notifications::{EmailSender, NotificationError, NotificationMessage};
use crate::config::EmailConfig;

#[derive(Template)]
#[template(path = "email/pickup.html")]
struct PickupEmailHtml<'a> {
    subject: &'a str,
    greeting: &'a str,
    body: &'a str,
    action_link: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/pickup.txt")]
struct PickupEmailText<'a> {
    greeting: &'a str,
    body: &'a str,
    action_link: Option<&'a str>,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Rendered email bodies.
#[derive(Debug)]
struct RenderedEmail {
    text: String,
    html: String,
}

fn render(message: &NotificationMessage) -> Result<RenderedEmail, askama::Error> {
    let action_link = message.action_link.as_deref();
    let html = PickupEmailHtml {
        subject: &message.subject,
        greeting: &message.greeting,
        body: &message.body,
        action_link,
    }
    .render()?;
    let text = PickupEmailText {
        greeting: &message.greeting,
        body: &message.body,
        action_link,
    }
    .render()?;
    Ok(RenderedEmail { text, html })
}

/// SMTP email sender.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailService {
    /// Create a new email service from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: String,
        html_body: String,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(subject = %subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for EmailService {
    async fn send_email(
        &self,
        to: &Email,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        let rendered = render(message).map_err(|e| NotificationError::Email(e.to_string()))?;
        self.send_multipart_email(to.as_str(), &message.subject, rendered.text, rendered.html)
            .await
            .map_err(|e| NotificationError::Email(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(link: Option<&str>) -> NotificationMessage {
        NotificationMessage {
            subject: "Order A-100 is ready for pickup".to_string(),
            greeting: "Hi Pat,".to_string(),
            body: "Your order A-100 is waiting at Main St Tower.".to_string(),
            action_link: link.map(ToString::to_string),
        }
    }

    #[test]
    fn test_render_includes_link_when_present() {
        let rendered = render(&message(Some("https://lockers.test/p/1"))).expect("render");
        assert!(rendered.html.contains("href=\"https://lockers.test/p/1\""));
        assert!(rendered.html.contains("Main St Tower"));
        assert!(rendered.text.contains("Open your locker: https://lockers.test/p/1"));
        assert!(rendered.text.starts_with("Hi Pat,"));
    }

    #[test]
    fn test_render_without_link() {
        let rendered = render(&message(None)).expect("render");
        assert!(!rendered.html.contains("Open your locker"));
        assert!(!rendered.text.contains("Open your locker"));
    }

    #[test]
    fn test_html_escapes_customer_text() {
        let mut msg = message(None);
        msg.greeting = "Hi <b>Pat</b>,".to_string();
        let rendered = render(&msg).expect("render");
        assert!(!rendered.html.contains("<b>Pat</b>"));
    }
}
