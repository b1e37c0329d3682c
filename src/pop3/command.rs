// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! POP3 command parsing

use std::str;

use crate::line;
use super::proto::Pop3Error;

crate::verbs! {
    pub enum Verb {
        User = "USER",
        Pass = "PASS",
        Quit = "QUIT",
        Stat = "STAT",
        List = "LIST",
        Retr = "RETR",
        Dele = "DELE",
        Noop = "NOOP",
        Rset = "RSET",
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Command<'a> {
    pub verb: Verb,
    /// Everything after the verb and its separating space
    pub argument: Option<&'a str>,
}

impl<'a> Command<'a> {
    /// Parse a normalized command line (without its CRLF)
    pub fn parse(line: &'a [u8]) -> Result<Self, Pop3Error> {
        let tokens = line::tokenize(line);
        let verb = Verb::classify(tokens.verb).ok_or(Pop3Error::InvalidCommand)?;

        let argument = match tokens.argument {
            None | Some(b"") => None,
            Some(argument) => Some(str::from_utf8(argument).map_err(|_| Pop3Error::InvalidArgument)?),
        };

        Ok(Command { verb, argument })
    }
}

/// Parse a message number argument
///
/// Returns the one-based number as given by the client.
pub fn message_number(argument: Option<&str>) -> Result<usize, Pop3Error> {
    let argument = argument.ok_or(Pop3Error::NoArgument)?;

    match argument.parse::<usize>() {
        Ok(0) | Err(_) => Err(Pop3Error::InvalidArgument),
        Ok(number) => Ok(number),
    }
}
