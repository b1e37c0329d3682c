// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Line oriented network I/O

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::util;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Reply produced by a protocol state machine for one input
#[derive(Debug)]
pub struct Response<'a> {
    pub data: &'a [u8],
    /// Should the connection be closed after sending `data`?
    pub close_connection: bool,
}

/// Buffered reader splitting a byte stream into lines
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Length of the line returned by the last call to `read_line`
    consumed: usize,
    max_length: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_length: usize) -> Self {
        // A line must at least be able to hold its own CRLF
        let max_length = max_length.max(2);

        LineReader {
            reader,
            buffer: Vec::with_capacity(max_length),
            consumed: 0,
            max_length,
            eof: false,
        }
    }

    /// Read a single line
    ///
    /// The returned line includes its `\n` terminator. When no terminator
    /// appears within the maximum line length, the first `max_length` bytes
    /// are returned instead and the rest of the line follows on the next call.
    /// A CR which would end such a prefix is left for the next call.
    /// An unterminated line at the end of the stream is returned as-is.
    /// Returns `None` once the stream is exhausted.
    pub async fn read_line(&mut self) -> io::Result<Option<&[u8]>> {
        self.buffer.drain(..self.consumed);
        self.consumed = 0;

        loop {
            let window = self.buffer.len().min(self.max_length);

            let end = match memchr::memchr(b'\n', &self.buffer[..window]) {
                Some(newline) => newline + 1,
                // Keep a CR at the boundary together with the LF that may follow
                None if window == self.max_length && self.buffer[window - 1] == b'\r' => window - 1,
                None if window == self.max_length => window,
                None if self.eof && self.buffer.is_empty() => return Ok(None),
                None if self.eof => self.buffer.len(),
                None => {
                    if self.reader.read_buf(&mut self.buffer).await? == 0 {
                        self.eof = true;
                    }
                    continue;
                }
            };

            self.consumed = end;
            return Ok(Some(&self.buffer[..end]));
        }
    }
}

/// Send data to the client, flushing it immediately
pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    for line in data.split_inclusive(|&c| c == b'\n') {
        log::trace!("<< {}", util::maybe_ascii(line));
    }

    writer.write_all(data).await?;
    writer.flush().await
}
