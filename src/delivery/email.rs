//! SMTP delivery via lettre.
//!
//! lettre's `SmtpTransport` is blocking, so each send runs on the blocking
//! pool. One transport (and its connection pool) is shared by all sends.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{env_opt, env_parse};
use crate::error::{ConfigError, DeliveryError};
use crate::pipeline::types::{DeliveryProvider, DeliveryReceipt, PreparedDigest};

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let required =
            |key: &str| env_opt(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        Ok(Self {
            host: required("SMTP_HOST")?,
            port: env_parse("SMTP_PORT", 587)?,
            username: required("SMTP_USERNAME")?,
            password: SecretString::from(required("SMTP_PASSWORD")?),
            from_address: required("DIGEST_FROM_ADDRESS")?,
        })
    }
}

pub struct SmtpDelivery {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpDelivery {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| DeliveryError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Self::with_transport(transport, &config.from_address)
    }

    /// Use a prebuilt transport (local relays, tests).
    pub fn with_transport(transport: SmtpTransport, from_address: &str) -> Result<Self, DeliveryError> {
        let from = parse_mailbox(from_address)?;
        Ok(Self { transport, from })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse().map_err(|e| DeliveryError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

fn build_message(from: &Mailbox, address: &str, digest: &PreparedDigest) -> Result<Message, DeliveryError> {
    let mut to = parse_mailbox(address)?;
    if to.name.is_none() {
        to.name = digest.recipient.name.clone();
    }

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(digest.subject.as_str())
        .body(digest.body.clone())
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[async_trait]
impl DeliveryProvider for SmtpDelivery {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(
        &self,
        address: &str,
        digest: &PreparedDigest,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let message = build_message(&self.from, address, digest)?;
        let transport = self.transport.clone();

        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError::Transport(format!("send task failed: {e}")))?
            .map_err(|e| {
                if e.is_permanent() {
                    DeliveryError::Rejected(e.to_string())
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        Ok(DeliveryReceipt {
            provider_id: response.first_line().map(|line| line.to_string()),
        })
    }
}
