use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    lettre::{
        Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart, header::ContentType},
        transport::smtp::{
            authentication::Credentials,
            client::{Tls, TlsParameters},
        },
    },
    scriptgate_config::SmtpConfig,
    tracing::{debug, info},
};

use crate::{
    capabilities::{Mailer, files::Attachment, mail::OutgoingMail},
    error::CapabilityError,
};

/// [`Mailer`] that delivers through the configured SMTP relay.
///
/// `tls = true` connects with implicit TLS (SMTPS); otherwise the session is
/// upgraded with STARTTLS when the server offers it.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, CapabilityError> {
        let host = cfg.host.trim();
        let mut builder = if cfg.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(smtp_error)?
        } else {
            let tls = TlsParameters::new(host.to_string()).map_err(smtp_error)?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Opportunistic(tls))
        };
        if cfg.port != 0 {
            builder = builder.port(cfg.port);
        }
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), CapabilityError> {
        let message = build_message(mail)?;
        let response = self.transport.send(message).await.map_err(smtp_error)?;
        info!(
            host = %self.host,
            recipients = mail.to.len() + mail.cc.len() + mail.bcc.len(),
            code = %response.code(),
            "mail sent"
        );
        Ok(())
    }
}

/// MIME message for a composed mail. Bcc recipients stay in the envelope
/// only.
pub fn build_message(mail: &OutgoingMail) -> Result<Message, CapabilityError> {
    let from_address: Address = mail
        .from_email
        .trim()
        .parse()
        .map_err(|e| CapabilityError::Mail(format!("invalid from address '{}': {e}", mail.from_email)))?;
    let from_name = (!mail.from_name.is_empty()).then(|| mail.from_name.clone());

    let mut builder = Message::builder()
        .from(Mailbox::new(from_name, from_address))
        .subject(mail.subject.clone());
    for addr in &mail.to {
        builder = builder.to(mailbox(addr)?);
    }
    for addr in &mail.cc {
        builder = builder.cc(mailbox(addr)?);
    }
    for addr in &mail.bcc {
        builder = builder.bcc(mailbox(addr)?);
    }

    let content_type = if mail.html {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };
    let body = SinglePart::builder()
        .header(content_type)
        .body(mail.body.clone());

    let built = if mail.attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let mut parts = MultiPart::mixed().singlepart(body);
        for attachment in &mail.attachments {
            parts = parts.singlepart(attachment_part(attachment)?);
        }
        debug!(count = mail.attachments.len(), "mail: attachments added");
        builder.multipart(parts)
    };
    built.map_err(|e| CapabilityError::Mail(format!("failed to build message: {e}")))
}

fn mailbox(addr: &str) -> Result<Mailbox, CapabilityError> {
    addr.parse()
        .map_err(|e| CapabilityError::Mail(format!("invalid address '{addr}': {e}")))
}

fn attachment_part(attachment: &Attachment) -> Result<SinglePart, CapabilityError> {
    let bytes = STANDARD.decode(attachment.content.trim()).map_err(|e| {
        CapabilityError::Mail(format!("attachment '{}' is not base64: {e}", attachment.filename))
    })?;
    let mime = match attachment.content_type.trim() {
        "" => "application/octet-stream",
        ct => ct,
    };
    let content_type = ContentType::parse(mime).map_err(|e| {
        CapabilityError::Mail(format!("attachment '{}' has bad content type: {e}", attachment.filename))
    })?;
    Ok(AttachmentPart::new(attachment.filename.clone()).body(bytes, content_type))
}

fn smtp_error(e: lettre::transport::smtp::Error) -> CapabilityError {
    CapabilityError::Mail(format!("SMTP: {e}"))
}
