// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use std::{fmt, io::Write};

/// Format protocol bytes for logs, without their line terminator
pub fn maybe_ascii(line: &[u8]) -> MaybeAscii {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    MaybeAscii(line)
}

pub struct MaybeAscii<'a>(&'a [u8]);

impl fmt::Display for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &byte in self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MaybeAscii<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// Append a formatted reply to a response buffer
pub fn reply(out: &mut Vec<u8>, args: fmt::Arguments) {
    // Writing into a Vec cannot fail
    let _ = out.write_fmt(args);
}
