// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! POP3 protocol state machine

use std::{io::Read, mem, sync::Arc};
use thiserror::Error;

use crate::{
    line::{self, LineError},
    net::Response,
    store::{Mailbox, StoreRef},
    util::reply,
};
use super::command::{self, Command, Verb};

/// Reasons for an `-ERR` reply
///
/// The display form of each variant is sent to the client verbatim.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Pop3Error {
    #[error("invalid request")]
    Malformed(#[from] LineError),
    #[error("invalid command")]
    InvalidCommand,
    #[error("you must be authenticated")]
    NotAuthenticated,
    #[error("already authenticated")]
    AlreadyAuthenticated,
    #[error("user requires a username parameter")]
    UserRequired,
    #[error("user doesn't exist, try again")]
    UnknownUser,
    #[error("no valid username provided")]
    NoUser,
    #[error("pass requires a password parameter")]
    PasswordRequired,
    #[error("password invalid, start with username again")]
    InvalidPassword,
    #[error("unable to open mailbox")]
    MailboxUnavailable,
    #[error("no argument provided")]
    NoArgument,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no such message")]
    NoSuchMessage,
    #[error("no such message, only {0} messages in the mailbox")]
    OutOfRange(usize),
    #[error("{0} already deleted")]
    AlreadyDeleted(usize),
    #[error("message doesn't exist")]
    MessageMissing,
    #[error("message is corrupted")]
    MessageCorrupted,
    #[error("some deleted messages not removed")]
    DeletionFailed,
}

pub struct Connection {
    host: Arc<str>,
    store: StoreRef,
    state: State,
    response: Vec<u8>,
}

enum State {
    /// Client has yet to authenticate, and may have named a user
    Authorization {
        user: Option<String>,
    },
    /// Client is authenticated and its mailbox is open
    Transaction {
        mailbox: Mailbox,
    },
    /// Client has quit
    Terminated,
}

impl Connection {
    pub fn new(host: Arc<str>, store: StoreRef) -> Self {
        Connection {
            host,
            store,
            state: State::Authorization { user: None },
            response: Vec::with_capacity(512),
        }
    }

    /// Respond to a new connection
    pub fn connect(&mut self) -> Response {
        self.response.clear();
        reply(&mut self.response, format_args!("+OK {} POP3 server ready\r\n", self.host));
        Response { data: &self.response, close_connection: false }
    }

    /// Respond to a connection being terminated abruptly
    pub fn close(&mut self) -> Response {
        self.response.clear();
        self.response.extend_from_slice(b"-ERR connection was terminated abruptly\r\n");
        Response { data: &self.response, close_connection: true }
    }

    /// Handle a single line sent by the client
    pub fn line(&mut self, line: &[u8]) -> Response {
        self.response.clear();

        if let State::Terminated = self.state {
            return Response { data: &self.response, close_connection: true };
        }

        let close_connection = match self.dispatch(line) {
            Ok(close) => close,
            Err(err) => {
                log::debug!("rejecting command: {err}");
                self.response.clear();
                reply(&mut self.response, format_args!("-ERR {err}\r\n"));
                false
            }
        };

        Response { data: &self.response, close_connection }
    }

    fn dispatch(&mut self, line: &[u8]) -> Result<bool, Pop3Error> {
        let line = line::normalize_pop3(line)?;
        let Command { verb, argument } = Command::parse(line)?;

        match verb {
            Verb::Quit => return Ok(self.quit()),
            Verb::User => self.user(argument)?,
            Verb::Pass => self.pass(argument)?,
            Verb::Stat => {
                let (out, mailbox) = self.transaction()?;
                reply(out, format_args!("+OK {} {}\r\n", mailbox.count(), mailbox.total_size()));
            }
            Verb::List => {
                let (out, mailbox) = self.transaction()?;
                list(out, mailbox, argument)?;
            }
            Verb::Retr => {
                let (out, mailbox) = self.transaction()?;
                retrieve(out, mailbox, argument)?;
            }
            Verb::Dele => {
                let (out, mailbox) = self.transaction()?;
                let number = command::message_number(argument)?;

                if number > mailbox.len() {
                    return Err(Pop3Error::OutOfRange(mailbox.len()));
                }

                if !mailbox.mark_deleted(number - 1) {
                    return Err(Pop3Error::AlreadyDeleted(number));
                }

                reply(out, format_args!("+OK message {number} deleted\r\n"));
            }
            Verb::Noop => {
                let (out, _) = self.transaction()?;
                out.extend_from_slice(b"+OK\r\n");
            }
            Verb::Rset => {
                let (out, mailbox) = self.transaction()?;
                mailbox.reset_deleted();
                reply(out, format_args!(
                    "+OK {}'s mailbox has {} messages ({} octets)\r\n",
                    mailbox.user(),
                    mailbox.count(),
                    mailbox.total_size(),
                ));
            }
        }

        Ok(false)
    }

    /// Get the open mailbox, failing if the client is not authenticated
    fn transaction(&mut self) -> Result<(&mut Vec<u8>, &mut Mailbox), Pop3Error> {
        match &mut self.state {
            State::Transaction { mailbox } => Ok((&mut self.response, mailbox)),
            _ => Err(Pop3Error::NotAuthenticated),
        }
    }

    /// Get the user named by a previous USER command
    fn pending_user(&mut self) -> Result<&mut Option<String>, Pop3Error> {
        match &mut self.state {
            State::Authorization { user } => Ok(user),
            State::Transaction { .. } => Err(Pop3Error::AlreadyAuthenticated),
            State::Terminated => Err(Pop3Error::InvalidCommand),
        }
    }

    fn user(&mut self, argument: Option<&str>) -> Result<(), Pop3Error> {
        let store = self.store.clone();
        let pending = self.pending_user()?;
        let name = argument.ok_or(Pop3Error::UserRequired)?;

        if !store.is_valid_user(name, None) {
            *pending = None;
            return Err(Pop3Error::UnknownUser);
        }

        *pending = Some(name.to_owned());
        self.response.extend_from_slice(b"+OK enter your password\r\n");
        Ok(())
    }

    fn pass(&mut self, argument: Option<&str>) -> Result<(), Pop3Error> {
        let store = self.store.clone();
        let pending = self.pending_user()?;
        let name = pending.clone().ok_or(Pop3Error::NoUser)?;
        let password = argument.ok_or(Pop3Error::PasswordRequired)?;

        if !store.is_valid_user(&name, Some(password)) {
            *pending = None;
            return Err(Pop3Error::InvalidPassword);
        }

        let mailbox = Mailbox::load(store, &name).map_err(|err| {
            log::warn!("could not open mailbox of {name}: {err}");
            Pop3Error::MailboxUnavailable
        })?;

        log::debug!("{name} authenticated");
        reply(&mut self.response, format_args!(
            "+OK {name}'s maildrop has {} messages ({} octets)\r\n",
            mailbox.count(),
            mailbox.total_size(),
        ));
        self.state = State::Transaction { mailbox };
        Ok(())
    }

    fn quit(&mut self) -> bool {
        if let State::Transaction { mailbox } = mem::replace(&mut self.state, State::Terminated) {
            let user = mailbox.user().to_owned();

            if let Err(err) = mailbox.commit() {
                log::error!("could not remove deleted messages of {user}: {err}");
                reply(&mut self.response, format_args!("-ERR {}\r\n", Pop3Error::DeletionFailed));
                return true;
            }
        }

        reply(&mut self.response, format_args!("+OK {} POP3 server signing off \r\n", self.host));
        true
    }
}

fn list(out: &mut Vec<u8>, mailbox: &Mailbox, argument: Option<&str>) -> Result<(), Pop3Error> {
    if argument.is_none() {
        reply(out, format_args!(
            "+OK {} messages ({} octets)\r\n",
            mailbox.count(),
            mailbox.total_size(),
        ));

        for (index, message) in mailbox.iter() {
            reply(out, format_args!("{} {}\r\n", index + 1, message.size));
        }

        out.extend_from_slice(b".\r\n");
        return Ok(());
    }

    let number = command::message_number(argument)?;
    let message = mailbox.message_at(number - 1).ok_or(Pop3Error::NoSuchMessage)?;
    reply(out, format_args!("+OK {number} {}\r\n", message.size));
    Ok(())
}

fn retrieve(out: &mut Vec<u8>, mailbox: &Mailbox, argument: Option<&str>) -> Result<(), Pop3Error> {
    let number = command::message_number(argument)?;
    let message = mailbox.message_at(number - 1).ok_or(Pop3Error::NoSuchMessage)?;

    let mut reader = mailbox.content_reader(number - 1).map_err(|err| {
        log::warn!("could not open message {} of {}: {err}", message.id, mailbox.user());
        Pop3Error::MessageMissing
    })?;

    // Read everything up front so that a failure can still be reported as
    // a single -ERR line.
    let mut content = Vec::with_capacity(message.size as usize);
    reader.read_to_end(&mut content).map_err(|err| {
        log::warn!("could not read message {} of {}: {err}", message.id, mailbox.user());
        Pop3Error::MessageCorrupted
    })?;

    reply(out, format_args!("+OK {} octets\r\n", message.size));
    write_stuffed(out, &content);
    out.extend_from_slice(b".\r\n");
    Ok(())
}

/// Write message content as a multi-line response body
///
/// Lines are terminated with CRLF and lines beginning with a dot get an extra
/// one.
fn write_stuffed(out: &mut Vec<u8>, content: &[u8]) {
    for line in content.split_inclusive(|&c| c == b'\n') {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if line.starts_with(b".") {
            out.push(b'.');
        }

        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use std::{io::{self, BufRead, BufReader}, path::Path};
    use crate::store::{MailStore, MemoryStore, Message, RecipientSet, StoreError};
    use super::*;

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_user("alice", "secret");
        store.add_message("alice", "Subject: one\r\n\r\nfirst\r\n").unwrap();
        store.add_message("alice", "Subject: two\r\n\r\n.hidden\r\nbare\nend").unwrap();
        store.add_message("alice", "x\r\n").unwrap();
        store
    }

    fn send(pop3: &mut Connection, line: &str) -> (String, bool) {
        let response = pop3.line(line.as_bytes());
        (String::from_utf8(response.data.to_vec()).unwrap(), response.close_connection)
    }

    fn reply_to(pop3: &mut Connection, line: &str) -> String {
        send(pop3, line).0
    }

    fn logged_in(store: Arc<MemoryStore>) -> Connection {
        let mut pop3 = Connection::new("mail.test".into(), store);
        assert_eq!(reply_to(&mut pop3, "USER alice\r\n"), "+OK enter your password\r\n");
        assert_eq!(
            reply_to(&mut pop3, "PASS secret\r\n"),
            "+OK alice's maildrop has 3 messages (59 octets)\r\n",
        );
        pop3
    }

    #[test]
    fn greets_and_signs_off() {
        let mut pop3 = Connection::new("mail.test".into(), store());

        let greeting = pop3.connect();
        assert_eq!(greeting.data, b"+OK mail.test POP3 server ready\r\n");
        assert!(!greeting.close_connection);

        assert_eq!(
            send(&mut pop3, "quit\r\n"),
            ("+OK mail.test POP3 server signing off \r\n".to_string(), true),
        );
        assert_eq!(pop3.close().data, b"-ERR connection was terminated abruptly\r\n");
    }

    #[test]
    fn authorization() {
        let mut pop3 = Connection::new("mail.test".into(), store());

        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "-ERR you must be authenticated\r\n");
        assert_eq!(reply_to(&mut pop3, "PASS secret\r\n"), "-ERR no valid username provided\r\n");
        assert_eq!(reply_to(&mut pop3, "USER\r\n"), "-ERR user requires a username parameter\r\n");
        assert_eq!(reply_to(&mut pop3, "USER nouser\r\n"), "-ERR user doesn't exist, try again\r\n");
        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "-ERR you must be authenticated\r\n");

        assert_eq!(reply_to(&mut pop3, "USER alice\r\n"), "+OK enter your password\r\n");
        assert_eq!(reply_to(&mut pop3, "PASS\r\n"), "-ERR pass requires a password parameter\r\n");
        assert_eq!(
            reply_to(&mut pop3, "PASS hunter2\r\n"),
            "-ERR password invalid, start with username again\r\n",
        );
        assert_eq!(reply_to(&mut pop3, "PASS secret\r\n"), "-ERR no valid username provided\r\n");

        let mut pop3 = logged_in(store());
        assert_eq!(reply_to(&mut pop3, "USER alice\r\n"), "-ERR already authenticated\r\n");
        assert_eq!(reply_to(&mut pop3, "PASS secret\r\n"), "-ERR already authenticated\r\n");
    }

    #[test]
    fn malformed_lines() {
        let mut pop3 = Connection::new("mail.test".into(), store());

        assert_eq!(send(&mut pop3, "STA\r\n"), ("-ERR invalid request\r\n".to_string(), false));
        assert_eq!(reply_to(&mut pop3, "STAT\n"), "-ERR invalid request\r\n");
        assert_eq!(reply_to(&mut pop3, "\r\n"), "-ERR invalid request\r\n");
        assert_eq!(reply_to(&mut pop3, "TOP 1 1\r\n"), "-ERR invalid command\r\n");
    }

    #[test]
    fn stat_list_and_delete() {
        let mut pop3 = logged_in(store());

        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "+OK 3 59\r\n");
        assert_eq!(
            reply_to(&mut pop3, "LIST\r\n"),
            "+OK 3 messages (59 octets)\r\n1 23\r\n2 33\r\n3 3\r\n.\r\n",
        );
        assert_eq!(reply_to(&mut pop3, "LIST 2\r\n"), "+OK 2 33\r\n");
        assert_eq!(reply_to(&mut pop3, "LIST 4\r\n"), "-ERR no such message\r\n");
        assert_eq!(reply_to(&mut pop3, "LIST 0\r\n"), "-ERR invalid argument\r\n");
        assert_eq!(reply_to(&mut pop3, "LIST x\r\n"), "-ERR invalid argument\r\n");

        assert_eq!(reply_to(&mut pop3, "DELE\r\n"), "-ERR no argument provided\r\n");
        assert_eq!(reply_to(&mut pop3, "DELE two\r\n"), "-ERR invalid argument\r\n");
        assert_eq!(
            reply_to(&mut pop3, "DELE 4\r\n"),
            "-ERR no such message, only 3 messages in the mailbox\r\n",
        );
        assert_eq!(reply_to(&mut pop3, "DELE 2\r\n"), "+OK message 2 deleted\r\n");
        assert_eq!(reply_to(&mut pop3, "DELE 2\r\n"), "-ERR 2 already deleted\r\n");

        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "+OK 2 26\r\n");
        assert_eq!(
            reply_to(&mut pop3, "LIST\r\n"),
            "+OK 2 messages (26 octets)\r\n1 23\r\n3 3\r\n.\r\n",
        );
        assert_eq!(reply_to(&mut pop3, "LIST 2\r\n"), "-ERR no such message\r\n");
        assert_eq!(reply_to(&mut pop3, "RETR 2\r\n"), "-ERR no such message\r\n");
        assert_eq!(reply_to(&mut pop3, "NOOP\r\n"), "+OK\r\n");

        assert_eq!(
            reply_to(&mut pop3, "RSET\r\n"),
            "+OK alice's mailbox has 3 messages (59 octets)\r\n",
        );
        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "+OK 3 59\r\n");
    }

    #[test]
    fn retrieve_stuffs_dots() {
        let mut pop3 = logged_in(store());

        assert_eq!(reply_to(&mut pop3, "RETR\r\n"), "-ERR no argument provided\r\n");
        assert_eq!(
            reply_to(&mut pop3, "RETR 1\r\n"),
            "+OK 23 octets\r\nSubject: one\r\n\r\nfirst\r\n.\r\n",
        );
        assert_eq!(
            reply_to(&mut pop3, "retr 2\r\n"),
            "+OK 33 octets\r\nSubject: two\r\n\r\n..hidden\r\nbare\r\nend\r\n.\r\n",
        );
    }

    #[test]
    fn deletions_need_quit() {
        let store = store();

        let mut pop3 = logged_in(store.clone());
        reply_to(&mut pop3, "DELE 1\r\n");
        drop(pop3);
        assert_eq!(store.messages("alice").len(), 3);

        let mut pop3 = logged_in(store.clone());
        reply_to(&mut pop3, "DELE 1\r\n");
        reply_to(&mut pop3, "DELE 3\r\n");
        assert!(send(&mut pop3, "QUIT\r\n").1);
        assert_eq!(
            store.messages("alice"),
            vec![b"Subject: two\r\n\r\n.hidden\r\nbare\nend".to_vec()],
        );
    }

    /// Store whose messages can be listed but not read
    struct Damaged {
        inner: MemoryStore,
        missing: bool,
    }

    struct FailingReader;

    impl io::Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "bad sector"))
        }
    }

    impl MailStore for Damaged {
        fn is_valid_user(&self, name: &str, password: Option<&str>) -> bool {
            self.inner.is_valid_user(name, password)
        }

        fn list_messages(&self, user: &str) -> Result<Vec<Message>, StoreError> {
            self.inner.list_messages(user)
        }

        fn open_message(&self, _: &str, id: &str) -> io::Result<Box<dyn BufRead + Send>> {
            if self.missing {
                Err(io::Error::new(io::ErrorKind::NotFound, format!("no message {id}")))
            } else {
                Ok(Box::new(BufReader::new(FailingReader)))
            }
        }

        fn remove_messages(&self, _: &str, _: &[&str]) -> Result<(), StoreError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn save_message(&self, message: &Path, recipients: &RecipientSet) -> Result<(), StoreError> {
            self.inner.save_message(message, recipients)
        }
    }

    fn damaged(missing: bool) -> Connection {
        let inner = MemoryStore::new();
        inner.add_user("alice", "secret");
        inner.add_message("alice", "hello\r\n").unwrap();

        let mut pop3 = Connection::new("mail.test".into(), Arc::new(Damaged { inner, missing }));
        reply_to(&mut pop3, "USER alice\r\n");
        reply_to(&mut pop3, "PASS secret\r\n");
        pop3
    }

    #[test]
    fn storage_failures_keep_the_session() {
        let mut pop3 = damaged(false);
        assert_eq!(send(&mut pop3, "RETR 1\r\n"), ("-ERR message is corrupted\r\n".to_string(), false));
        assert_eq!(reply_to(&mut pop3, "STAT\r\n"), "+OK 1 7\r\n");

        let mut pop3 = damaged(true);
        assert_eq!(reply_to(&mut pop3, "RETR 1\r\n"), "-ERR message doesn't exist\r\n");

        assert_eq!(reply_to(&mut pop3, "DELE 1\r\n"), "+OK message 1 deleted\r\n");
        assert_eq!(
            send(&mut pop3, "QUIT\r\n"),
            ("-ERR some deleted messages not removed\r\n".to_string(), true),
        );
    }
}
