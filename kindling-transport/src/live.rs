//! Blocking SMTP/IMAP clients bridged onto the async runtime.
//!
//! Both protocol crates are synchronous, so every operation runs under
//! `spawn_blocking` with owned copies of its inputs.

use std::net::TcpStream;

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use mailparse::MailHeaderMap;
use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use crate::{MailAccount, MailTransport, OutgoingMessage, TransportError};

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// Real provider transport. Stateless; connections are per-operation,
/// matching how infrequently the warmup engine touches each mailbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveTransport;

impl LiveTransport {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for LiveTransport {
    async fn send_message(
        &self,
        account: &MailAccount,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        let account = account.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || send_blocking(&account, &message))
            .await
            .map_err(|err| TransportError::Task(err.to_string()))?
    }

    async fn find_latest_message_id_by_subject(
        &self,
        account: &MailAccount,
        from: &str,
        subject: &str,
    ) -> Result<Option<String>, TransportError> {
        let account = account.clone();
        let from = from.to_string();
        let subject = subject.to_string();
        tokio::task::spawn_blocking(move || find_message_id_blocking(&account, &from, &subject))
            .await
            .map_err(|err| TransportError::Task(err.to_string()))?
    }

    async fn count_in_folder(
        &self,
        account: &MailAccount,
        folder: &str,
        day: NaiveDate,
        from: &str,
    ) -> Result<u32, TransportError> {
        let account = account.clone();
        let folder = folder.to_string();
        let from = from.to_string();
        tokio::task::spawn_blocking(move || count_blocking(&account, &folder, day, &from))
            .await
            .map_err(|err| TransportError::Task(err.to_string()))?
    }
}

fn send_blocking(account: &MailAccount, message: &OutgoingMessage) -> Result<(), TransportError> {
    let from: Mailbox = format!("{} <{}>", account.display_name, account.email)
        .parse()
        .map_err(|err| TransportError::Address(format!("Invalid sender address: {err}")))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|err| TransportError::Address(format!("Invalid recipient address: {err}")))?;

    let mut builder = Message::builder()
        .from(from.clone())
        .reply_to(from)
        .to(to)
        .subject(message.subject.clone());

    if let Some(parent) = &message.in_reply_to {
        builder = builder
            .in_reply_to(parent.clone())
            .references(parent.clone());
    }

    let email = builder
        .header(ContentType::TEXT_HTML)
        .body(message.html_body.clone())
        .map_err(|err| TransportError::Build(err.to_string()))?;

    let mailer = SmtpTransport::starttls_relay(account.provider.smtp_host())
        .map_err(|err| TransportError::Smtp(err.to_string()))?
        .credentials(Credentials::new(
            account.email.clone(),
            account.app_password.clone(),
        ))
        .build();

    mailer
        .send(&email)
        .map_err(|err| TransportError::Smtp(err.to_string()))?;

    debug!(from = %account.email, to = %message.to, "Submitted message");

    Ok(())
}

fn open_session(account: &MailAccount) -> Result<ImapSession, TransportError> {
    let tls = TlsConnector::builder()
        .build()
        .map_err(|err| TransportError::Tls(err.to_string()))?;

    let host = account.provider.imap_host();
    let client = imap::connect((host, 993), host, &tls)
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    client
        .login(&account.email, &account.app_password)
        .map_err(|(err, _)| TransportError::Credentials(err.to_string()))
}

fn find_message_id_blocking(
    account: &MailAccount,
    from: &str,
    subject: &str,
) -> Result<Option<String>, TransportError> {
    let mut session = open_session(account)?;
    session
        .select(account.provider.inbox_folder())
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    let query = format!("(FROM \"{from}\" SUBJECT \"{subject}\")");
    let matches = session
        .search(&query)
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    let Some(newest) = matches.iter().max().copied() else {
        let _ = session.logout();
        return Ok(None);
    };

    let fetches = session
        .fetch(newest.to_string(), "RFC822.HEADER")
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    let message_id = fetches
        .first()
        .and_then(imap::types::Fetch::header)
        .map(mailparse::parse_headers)
        .transpose()
        .map_err(|err| TransportError::Imap(err.to_string()))?
        .and_then(|(headers, _)| headers.get_first_value("Message-ID"))
        .map(|id| id.trim().to_string());

    let _ = session.logout();
    Ok(message_id)
}

fn count_blocking(
    account: &MailAccount,
    folder: &str,
    day: NaiveDate,
    from: &str,
) -> Result<u32, TransportError> {
    let mut session = open_session(account)?;
    session
        .select(folder)
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    let since = day.format("%d-%b-%Y");
    let until = day.succ_opt().unwrap_or(day).format("%d-%b-%Y");
    let query = format!("(SINCE {since} BEFORE {until} FROM \"{from}\")");
    let matches = session
        .search(&query)
        .map_err(|err| TransportError::Imap(err.to_string()))?;

    let _ = session.logout();
    Ok(u32::try_from(matches.len()).unwrap_or(u32::MAX))
}
