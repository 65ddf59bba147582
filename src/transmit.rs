//! Outbound message composition and delivery
//!
//! [`compose`] builds the RFC 5322 bytes and the SMTP envelope with
//! the `lettre` builder; a [`Relay`] delivers them. Bcc recipients
//! only ever appear in the envelope.

use crate::config::{DomainSettings, MailAccountCredential, TransportSecurity};
use crate::error::SendError;
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A message to send, as handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
    /// Message-ID of the message being replied to.
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A composed message ready for the wire.
#[derive(Debug, Clone)]
pub struct Composed {
    pub envelope: Envelope,
    pub formatted: Vec<u8>,
}

/// Build the message bytes and envelope for `message` sent by `from`.
///
/// Text and html bodies become alternatives; attachments are added as
/// base64 parts next to them.
///
/// # Errors
///
/// Returns [`SendError::Compose`] for an invalid address, a message
/// without recipients, or a message lettre refuses to build.
pub fn compose(from: &str, message: &OutgoingMessage) -> Result<Composed, SendError> {
    if message.to.is_empty() && message.cc.is_empty() && message.bcc.is_empty() {
        return Err(SendError::Compose("no recipients".into()));
    }

    let mut builder = lettre::Message::builder()
        .from(mailbox(from)?)
        .subject(message.subject.clone())
        .message_id(None);
    for addr in &message.to {
        builder = builder.to(mailbox(addr)?);
    }
    for addr in &message.cc {
        builder = builder.cc(mailbox(addr)?);
    }
    for addr in &message.bcc {
        builder = builder.bcc(mailbox(addr)?);
    }
    if let Some(parent) = &message.in_reply_to {
        builder = builder.in_reply_to(parent.clone());
    }
    if !message.references.is_empty() {
        builder = builder.references(message.references.join(" "));
    }

    let mut body = MultiPart::alternative().build();
    match (&message.body_text, &message.body_html) {
        (None, None) => body = body.singlepart(SinglePart::plain(String::new())),
        (text, html) => {
            if let Some(text) = text {
                body = body.singlepart(SinglePart::plain(text.clone()));
            }
            if let Some(html) = html {
                body = body.singlepart(SinglePart::html(html.clone()));
            }
        }
    }

    let root = if message.attachments.is_empty() {
        body
    } else {
        let mut mixed = MultiPart::mixed().build().multipart(body);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
                SendError::Compose(format!(
                    "invalid content type {:?} for {}: {e}",
                    attachment.content_type, attachment.filename
                ))
            })?;
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }
        mixed
    };

    let email = builder
        .multipart(root)
        .map_err(|e| SendError::Compose(e.to_string()))?;

    Ok(Composed {
        envelope: email.envelope().clone(),
        formatted: email.formatted(),
    })
}

fn mailbox(addr: &str) -> Result<Mailbox, SendError> {
    addr.trim()
        .parse()
        .map_err(|e| SendError::Compose(format!("invalid address {addr:?}: {e}")))
}

/// Delivers composed messages for an account.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Deliver to every envelope recipient in one transport session.
    /// One rejected recipient fails the whole delivery.
    async fn deliver(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        composed: &Composed,
    ) -> Result<(), SendError>;
}

/// How the relay connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    None,
    /// TLS from the first byte.
    Wrapper,
    /// STARTTLS, refusing to continue without it.
    Required,
}

/// Port 465 is SMTPS: STARTTLS is never offered there.
const fn tls_mode(domain: &DomainSettings) -> TlsMode {
    match domain.security {
        TransportSecurity::Plain => TlsMode::None,
        TransportSecurity::Implicit => TlsMode::Wrapper,
        TransportSecurity::StartTls if domain.smtp_port == 465 => TlsMode::Wrapper,
        TransportSecurity::StartTls => TlsMode::Required,
    }
}

/// [`Relay`] over SMTP with `lettre`.
#[derive(Debug, Clone)]
pub struct SmtpRelay {
    timeout: Duration,
}

impl SmtpRelay {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let tls = match tls_mode(domain) {
            TlsMode::None => Tls::None,
            mode => {
                let params = TlsParameters::builder(domain.smtp_host.clone())
                    .dangerous_accept_invalid_certs(domain.accept_invalid_certs)
                    .build_rustls()
                    .map_err(|e| SendError::Transport(format!("TLS setup failed: {e}")))?;
                if mode == TlsMode::Wrapper {
                    Tls::Wrapper(params)
                } else {
                    Tls::Required(params)
                }
            }
        };

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&domain.smtp_host)
                .port(domain.smtp_port)
                .tls(tls)
                .credentials(Credentials::new(
                    account.username.clone(),
                    account.secret.clone(),
                ))
                .timeout(Some(self.timeout))
                .build(),
        )
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn deliver(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        composed: &Composed,
    ) -> Result<(), SendError> {
        debug!(
            "Delivering via {}:{} to {} recipients",
            domain.smtp_host,
            domain.smtp_port,
            composed.envelope.to().len()
        );

        let transport = self.transport(domain, account)?;
        let response = transport
            .send_raw(&composed.envelope, &composed.formatted)
            .await
            .map_err(|e| {
                warn!("Delivery for {} failed: {}", account.email_address, e);
                classify(&e)
            })?;

        info!(
            "Delivered message for {}: {}",
            account.email_address,
            response.message().collect::<Vec<_>>().join(" ")
        );
        Ok(())
    }
}

/// Separate rejected credentials from every other relay failure.
fn classify(e: &lettre::transport::smtp::Error) -> SendError {
    let code = e.status().map(|c| c.to_string());
    match code.as_deref() {
        Some("530" | "534" | "535") => SendError::Authentication(e.to_string()),
        _ => SendError::Transport(e.to_string()),
    }
}
