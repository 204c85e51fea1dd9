use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::{Error, ErrorKind, Result};

pub mod list;
pub mod pixel;

/// A single message ready to be handed over to a transport.
#[derive(Clone, Debug, Default)]
pub struct Outgoing {
    pub to: String,
    pub to_name: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Outbound mail transport.
///
/// Implemented over SMTP for production use. Kept behind a trait so that the
/// batched sender can be driven by test doubles.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends a single message, returning the message id on success.
    async fn send(&self, message: Outgoing) -> Result<String>;

    /// Checks that the transport is reachable and accepts our credentials,
    /// without sending anything.
    async fn verify(&self) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Mailbox,
    domain: String,
}

impl SmtpMailer {
    pub fn new(config: &crate::Config) -> Result<Self> {
        let creds = Credentials::new(
            config.email.smtp_user.clone(),
            config.email.smtp_password.clone(),
        );

        let transport =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.email.smtp_server)?
                .port(config.email.smtp_port)
                .credentials(creds)
                .build();

        let address = if config.email.address.is_empty() {
            &config.email.smtp_user
        } else {
            &config.email.address
        };

        Ok(Self {
            transport,
            from: parse_mailbox(&format!("{} <{}>", config.name, address))?,
            reply_to: parse_mailbox(&format!("noreply <noreply@{}>", config.domain))?,
            domain: config.domain.clone(),
        })
    }

    fn build(&self, message: Outgoing) -> Result<(Message, String)> {
        let to = if message.to_name.is_empty() {
            parse_mailbox(&message.to)?
        } else {
            parse_mailbox(&format!("{} <{}>", message.to_name, message.to))
                .or_else(|_| parse_mailbox(&message.to))?
        };
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.domain);

        let builder = Message::builder()
            .from(self.from.clone())
            .reply_to(self.reply_to.clone())
            .to(to)
            .message_id(Some(message_id.clone()))
            .subject(message.subject);

        let email = match (message.text, message.html) {
            (Some(plain), Some(html)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(plain))
                    .singlepart(SinglePart::html(html)),
            )?,
            (None, Some(html)) => builder.header(ContentType::TEXT_HTML).body(html)?,
            (Some(plain), None) => builder.header(ContentType::TEXT_PLAIN).body(plain)?,
            (None, None) => builder.header(ContentType::TEXT_PLAIN).body(String::new())?,
        };

        Ok((email, message_id))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: Outgoing) -> Result<String> {
        let (email, message_id) = self.build(message)?;

        let response = self.transport.send(email).await?;
        if response.is_positive() {
            Ok(message_id)
        } else {
            Err(ErrorKind::EmailBadResponse(response.code().to_string()).into())
        }
    }

    async fn verify(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ErrorKind::TransportUnavailable(
                "smtp server did not accept the connection".to_string(),
            )
            .into()),
            Err(e) => Err(ErrorKind::TransportUnavailable(e.to_string()).into()),
        }
    }
}

pub fn parse_mailbox(s: &str) -> Result<Mailbox> {
    s.parse()
        .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))
}
