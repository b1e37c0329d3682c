// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Normalization and tokenization of command lines

use thiserror::Error;

pub const CRLF: &[u8] = b"\r\n";

/// Shortest acceptable POP3 command line: a four letter verb, CRLF, and one
/// separator byte.
pub const POP3_MIN_LINE: usize = 6;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line is not terminated by CRLF")]
    MissingCrlf,
    #[error("line is empty")]
    Empty,
    #[error("line is shorter than {0} bytes")]
    TooShort(usize),
}

/// Strip the CRLF terminator, failing if it is missing or nothing precedes it
pub fn strip_crlf(line: &[u8]) -> Result<&[u8], LineError> {
    let body = line.strip_suffix(CRLF).ok_or(LineError::MissingCrlf)?;

    if body.is_empty() {
        Err(LineError::Empty)
    } else {
        Ok(body)
    }
}

/// Validate a raw POP3 line, returning it without its terminator
pub fn normalize_pop3(line: &[u8]) -> Result<&[u8], LineError> {
    let body = strip_crlf(line)?;

    if line.len() < POP3_MIN_LINE {
        return Err(LineError::TooShort(POP3_MIN_LINE));
    }

    Ok(body)
}

/// Validate a raw SMTP command line, returning it without its terminator and
/// without the spaces preceding it
pub fn normalize_smtp(line: &[u8]) -> Result<&[u8], LineError> {
    let body = trim_trailing_spaces(strip_crlf(line)?);

    if body.is_empty() {
        Err(LineError::Empty)
    } else {
        Ok(body)
    }
}

pub fn trim_trailing_spaces(mut line: &[u8]) -> &[u8] {
    while let Some(rest) = line.strip_suffix(b" ") {
        line = rest;
    }
    line
}

/// A command line split at its first space
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tokens<'a> {
    pub verb: &'a [u8],
    /// Everything after the first space, `None` if there was no space
    pub argument: Option<&'a [u8]>,
}

pub fn tokenize(line: &[u8]) -> Tokens {
    match memchr::memchr(b' ', line) {
        Some(space) => Tokens {
            verb: &line[..space],
            argument: Some(&line[space + 1..]),
        },
        None => Tokens { verb: line, argument: None },
    }
}
