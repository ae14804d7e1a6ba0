use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::fmt::Display;
use validator::Validate;

/// SMTP delivery channel. The recipient comes per message from the notifier,
/// so only the sender side lives in config. Credentials use `RedactedString`
/// and never appear in logs or serialized output.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[serde_as]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (not recommended for production)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl Notification for SmtpNotificationConfig {
    fn send<D1: Display, D2: Display>(&self, to: &Mailbox, topic: D1, msg: D2) -> Result<()> {
        tracing::info!("Sending smtp notification from {:?} to {:?}", self.from, to);
        let email = Message::builder()
            .to(to.clone())
            .from(self.from.clone())
            .subject(format!("{}", topic))
            .header(ContentType::TEXT_PLAIN)
            .body(format!("{}", msg))
            .map_err(Error::from)
            .with_msg(format!(
                "Failed to build notification email from {:?} to {:?}",
                self.from, to
            ))?;

        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .with_msg(format!(
            "Failed to build smtp client for host {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))?
        .credentials(creds)
        .build();

        let response = mailer.send(&email).map_err(Error::from)?;
        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::SmtpSend(m.to_owned()))
                .collect_vec();
            if error_vec.is_empty() {
                Err(Error::SmtpSend("unspecified server rejection".into()))
            } else {
                Err(error_vec.into())
            }
        }
    }
}
