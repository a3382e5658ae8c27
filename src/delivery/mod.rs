//! Delivery providers. Digests go out as plain-text email over SMTP.

pub mod email;

pub use email::{SmtpConfig, SmtpDelivery};
