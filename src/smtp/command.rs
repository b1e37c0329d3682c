// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP command parsing

use crate::line::{self, Tokens};
use super::syntax::SliceExt;

crate::verbs! {
    pub enum Verb {
        Helo = "HELO",
        Ehlo = "EHLO",
        Mail = "MAIL",
        Rcpt = "RCPT",
        Data = "DATA",
        Rset = "RSET",
        Vrfy = "VRFY",
        Expn = "EXPN",
        Help = "HELP",
        Noop = "NOOP",
        Quit = "QUIT",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// `HELO`, with its unparsed argument
    Hello(&'a [u8]),
    /// `MAIL FROM:`, with everything after the colon
    Mail(&'a [u8]),
    /// `RCPT TO:`, with everything after the colon
    Recipient(&'a [u8]),
    Data,
    Noop,
    Quit,
    /// A command we know of but don't support
    NotImplemented(Verb),
    Unrecognized,
}

impl<'a> Command<'a> {
    /// Parse a normalized command line (without its CRLF and trailing spaces)
    pub fn parse(line: &'a [u8]) -> Self {
        let Tokens { verb, argument } = line::tokenize(line);

        let verb = match Verb::classify(verb) {
            Some(verb) => verb,
            None => return Command::Unrecognized,
        };

        match (verb, argument) {
            (Verb::Helo, Some(argument)) => Command::Hello(argument),
            (Verb::Mail, Some(mut argument)) => match argument.expect_caseless(b"FROM:") {
                Ok(()) => Command::Mail(argument),
                Err(_) => Command::Unrecognized,
            },
            (Verb::Rcpt, Some(mut argument)) => match argument.expect_caseless(b"TO:") {
                Ok(()) => Command::Recipient(argument),
                Err(_) => Command::Unrecognized,
            },
            (Verb::Data, None) => Command::Data,
            (Verb::Noop, _) => Command::Noop,
            (Verb::Quit, None) => Command::Quit,
            (Verb::Ehlo | Verb::Vrfy | Verb::Expn, Some(_))
            | (Verb::Rset, None)
            | (Verb::Help, _) => Command::NotImplemented(verb),
            _ => Command::Unrecognized,
        }
    }
}
