use crate::config::{Config, TlsMode, SMTP};

use async_trait::async_trait;

use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("邮件地址无效: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("构造邮件失败: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP 发送失败: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("生成纯文本正文失败: {0}")]
    Text(#[from] html2text::Error),
}

/// Delivery seam for the mail job.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, html: &str) -> Result<(), MailError>;
}

/// Sends HTML mail with a plain text alternative to the configured recipients.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn new(config: &Config) -> Result<Self, MailError> {
        let transport = Self::transport(&config.smtp)?;

        let from = config.mail.from.parse()?;
        let to = config
            .mail
            .to
            .iter()
            .filter(|to| !to.trim().is_empty())
            .map(|to| to.parse())
            .collect::<Result<Vec<Mailbox>, _>>()?;

        Ok(Self { transport, from, to })
    }

    fn transport(smtp: &SMTP) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let builder = match smtp.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?,
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?,
        };

        let credentials = Credentials::new(smtp.username.to_string(), smtp.credential.to_string());

        Ok(builder
            .port(smtp.port)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .timeout(Some(Duration::from_secs(30)))
            .credentials(credentials)
            .build())
    }

    pub fn message(&self, subject: &str, html: &str) -> Result<Message, MailError> {
        let text = html2text::from_read(html.as_bytes(), 80)?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject);

        for to in &self.to {
            builder = builder.to(to.clone());
        }

        let email = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(text),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.to_string()),
                ),
        )?;

        Ok(email)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, html: &str) -> Result<(), MailError> {
        let email = self.message(subject, html)?;

        self.transport.send(email).await?;

        tracing::info!(recipients = self.to.len(), subject, "Email sent");
        Ok(())
    }
}
