//! SMTP protocol state machine

use std::{io, mem, path::Path, str, sync::Arc};
use thiserror::Error;

use crate::{
    line::{self, LineError},
    net::Response,
    store::{RecipientSet, StoreError, StoreRef},
    util::{self, reply},
};
use super::{
    command::Command,
    data::DataStager,
    syntax::{self, PathError, ReversePath},
};

/// Reasons for a negative reply
///
/// The display form of each variant is the reply text sent after its code.
#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("Syntax error, command unrecognized or too long")]
    Syntax,
    #[error("Syntax error, command unrecognized or too long")]
    Malformed(#[from] LineError),
    #[error("Syntax error in parameters or arguments")]
    Parameters,
    #[error("Command not implemented")]
    NotImplemented,
    #[error("Bad sequence of commands")]
    BadSequence,
    #[error("mail box not found")]
    MailboxNotFound,
    #[error("parameters not recognized or not implemented")]
    UnsupportedParameters,
    /// Message could not be spooled
    #[error("Requested action aborted due to local error")]
    Local(#[source] io::Error),
    /// Message could not be delivered to recipients
    #[error("Requested action aborted due to local error")]
    Delivery(#[source] StoreError),
}

impl SmtpError {
    pub fn code(&self) -> u16 {
        match self {
            SmtpError::Syntax | SmtpError::Malformed(_) => 500,
            SmtpError::Parameters => 501,
            SmtpError::NotImplemented => 502,
            SmtpError::BadSequence => 503,
            SmtpError::MailboxNotFound => 550,
            SmtpError::UnsupportedParameters => 555,
            SmtpError::Local(_) | SmtpError::Delivery(_) => 451,
        }
    }

    /// Should the connection be closed after reporting this error?
    pub fn is_fatal(&self) -> bool {
        matches!(self, SmtpError::Local(_))
    }
}

impl From<PathError> for SmtpError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Invalid => SmtpError::Parameters,
            PathError::Trailing => SmtpError::UnsupportedParameters,
        }
    }
}

pub struct Connection {
    /// Host name to present to clients, if known
    host: Option<Arc<str>>,
    store: StoreRef,
    spool_dir: Arc<Path>,
    state: State,
    response: Vec<u8>,
}

enum State {
    /// Waiting for HELO
    Greeting,
    /// Waiting for MAIL
    Mail,
    /// Collecting recipients
    Recipient(RecipientSet),
    /// Receiving message content
    Data(DataStager),
}

impl Connection {
    pub fn new(host: Option<Arc<str>>, store: StoreRef, spool_dir: Arc<Path>) -> Self {
        Connection {
            host,
            store,
            spool_dir,
            state: State::Greeting,
            response: Vec::with_capacity(128),
        }
    }

    /// Respond to a new connection
    pub fn connect(&mut self) -> Response {
        self.response.clear();

        match self.host {
            Some(ref host) => reply(
                &mut self.response,
                format_args!("220 {host} Simple Mail Transfer Service Ready\r\n"),
            ),
            None => self.response.extend_from_slice(b"220\r\n"),
        }

        Response { data: &self.response, close_connection: false }
    }

    /// Respond to a connection being terminated abruptly
    pub fn close(&mut self) -> Response {
        self.response.clear();
        self.response.extend_from_slice(b"421 Service not available, closing channel\r\n");
        Response { data: &self.response, close_connection: true }
    }

    /// Handle a single line sent by the client
    ///
    /// Returns `None` for lines of message content, which get no reply.
    pub fn line(&mut self, line: &[u8]) -> Option<Response> {
        self.response.clear();

        let close_connection = match self.handle(line) {
            Ok(None) => return None,
            Ok(Some(close)) => close,
            Err(err) => {
                match err {
                    SmtpError::Local(ref source) => log::error!("could not spool message: {source}"),
                    SmtpError::Delivery(ref source) => log::error!("could not deliver message: {source}"),
                    _ => log::debug!("rejecting {}: {err}", util::maybe_ascii(line)),
                }

                self.response.clear();
                reply(&mut self.response, format_args!("{} {err}\r\n", err.code()));
                err.is_fatal()
            }
        };

        Some(Response { data: &self.response, close_connection })
    }

    fn handle(&mut self, line: &[u8]) -> Result<Option<bool>, SmtpError> {
        match mem::replace(&mut self.state, State::Mail) {
            State::Data(mut stager) => {
                if !stager.push(line).map_err(SmtpError::Local)? {
                    self.state = State::Data(stager);
                    return Ok(None);
                }

                let recipients = stager.recipients().len();
                stager.deliver(&*self.store)?;

                log::debug!("delivered message to {recipients} recipients");
                self.response.extend_from_slice(b"250 OK\r\n");
                Ok(Some(false))
            }
            state => {
                self.state = state;
                self.command(line)
            }
        }
    }

    fn command(&mut self, line: &[u8]) -> Result<Option<bool>, SmtpError> {
        let line = line::normalize_smtp(line)?;

        match Command::parse(line) {
            Command::Noop => self.response.extend_from_slice(b"250 OK\r\n"),
            Command::Quit => {
                self.response.extend_from_slice(b"221 OK\r\n");
                return Ok(Some(true));
            }
            Command::NotImplemented(verb) => {
                log::debug!("client tried {verb}");
                return Err(SmtpError::NotImplemented);
            }
            Command::Unrecognized => return Err(SmtpError::Syntax),
            Command::Hello(argument) => self.hello(argument)?,
            Command::Mail(argument) => self.mail(argument)?,
            Command::Recipient(argument) => self.recipient(argument)?,
            Command::Data => self.data()?,
        }

        Ok(Some(false))
    }

    fn hello(&mut self, argument: &[u8]) -> Result<(), SmtpError> {
        if !matches!(self.state, State::Greeting) {
            return Err(SmtpError::BadSequence);
        }

        let domain = syntax::helo_domain(argument);

        if !syntax::is_valid_domain(domain) {
            return Err(SmtpError::Parameters);
        }

        reply(&mut self.response, format_args!(
            "250 OK {} greets {}\r\n",
            self.host.as_deref().unwrap_or("localhost"),
            util::maybe_ascii(domain),
        ));
        self.state = State::Mail;
        Ok(())
    }

    fn mail(&mut self, argument: &[u8]) -> Result<(), SmtpError> {
        if !matches!(self.state, State::Mail) {
            return Err(SmtpError::BadSequence);
        }

        match syntax::reverse_path(argument)? {
            ReversePath::Null => log::debug!("mail from null sender"),
            ReversePath::Mailbox(from) => log::debug!("mail from {}", util::maybe_ascii(from)),
        }

        self.response.extend_from_slice(b"250 OK\r\n");
        self.state = State::Recipient(RecipientSet::new());
        Ok(())
    }

    fn recipient(&mut self, argument: &[u8]) -> Result<(), SmtpError> {
        let recipients = match &mut self.state {
            State::Recipient(recipients) => recipients,
            _ => return Err(SmtpError::BadSequence),
        };

        let mailbox = syntax::forward_path(argument)?;
        let mailbox = str::from_utf8(mailbox).map_err(|_| SmtpError::Parameters)?;

        if !self.store.is_valid_user(mailbox, None) {
            return Err(SmtpError::MailboxNotFound);
        }

        recipients.insert(mailbox.to_owned());
        self.response.extend_from_slice(b"250 OK\r\n");
        Ok(())
    }

    fn data(&mut self) -> Result<(), SmtpError> {
        let recipients = match &mut self.state {
            State::Recipient(recipients) if !recipients.is_empty() => mem::take(recipients),
            _ => return Err(SmtpError::BadSequence),
        };

        let stager = DataStager::create(&self.spool_dir, recipients).map_err(SmtpError::Local)?;
        self.response.extend_from_slice(b"354 OK Start mail input\r\n");
        self.state = State::Data(stager);
        Ok(())
    }
}
