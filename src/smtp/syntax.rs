//! Validation of SMTP command arguments

pub type Result<T, E = SyntaxError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntaxError;

pub trait SliceExt<'a> {
    /// Advance this slice by `number` positions
    fn advance(&mut self, number: usize);

    /// Return `Ok(())` and advance this slice if it begins (case insensitive)
    /// with `needle`
    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()>;

    /// Return `Ok(())` if this slice is empty
    fn expect_empty(&self) -> Result<()>;

    /// Return longest prefix whose characters match `test`, advancing this
    /// slice by its length
    fn take_while(&mut self, test: impl FnMut(u8, usize) -> bool) -> &'a [u8];
}

impl<'a> SliceExt<'a> for &'a [u8] {
    fn advance(&mut self, by: usize) {
        *self = &self[by..];
    }

    fn expect_caseless(&mut self, needle: &[u8]) -> Result<()> {
        if needle.len() <= self.len() && self[..needle.len()].eq_ignore_ascii_case(needle) {
            self.advance(needle.len());
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn expect_empty(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SyntaxError)
        }
    }

    fn take_while(&mut self, mut test: impl FnMut(u8, usize) -> bool) -> &'a [u8] {
        let mut offset = 0;

        while offset < self.len() && test(self[offset], offset) {
            offset += 1;
        }

        let result = &self[..offset];
        self.advance(offset);
        result
    }
}

/// Extract the client's domain from the argument of HELO
pub fn helo_domain(mut argument: &[u8]) -> &[u8] {
    argument.take_while(|c, _| c.is_ascii_whitespace());
    argument.take_while(|c, _| !c.is_ascii_whitespace())
}

/// Check that `domain` looks like a domain name
///
/// Labels are made of letters, digits, and hyphens, and are separated by
/// single dots. A domain may not begin with a dot or a hyphen.
pub fn is_valid_domain(domain: &[u8]) -> bool {
    let (&first, rest) = match domain.split_first() {
        Some(split) => split,
        None => return false,
    };

    if first == b'.' || first == b'-' {
        return false;
    }

    let mut previous = first;

    for &c in rest {
        if !(c.is_ascii_alphanumeric() || c == b'.' || c == b'-') {
            return false;
        }

        if previous == b'.' && (c == b'.' || c == b'-') {
            return false;
        }

        previous = c;
    }

    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathError {
    /// Argument doesn't begin with a valid path
    Invalid,
    /// Path is followed by parameters
    Trailing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReversePath<'a> {
    Null,
    Mailbox(&'a [u8]),
}

/// Parse the argument of `MAIL FROM:`
pub fn reverse_path(argument: &[u8]) -> Result<ReversePath, PathError> {
    let (path, rest) = split_path(argument);

    let from = if path == b"<>" {
        ReversePath::Null
    } else if is_valid_path(path) {
        ReversePath::Mailbox(mailbox(path))
    } else {
        return Err(PathError::Invalid);
    };

    rest.expect_empty().map_err(|_| PathError::Trailing)?;
    Ok(from)
}

/// Parse the argument of `RCPT TO:`, returning the recipient's mailbox
pub fn forward_path(argument: &[u8]) -> Result<&[u8], PathError> {
    let (path, rest) = split_path(argument);

    if !is_valid_path(path) {
        return Err(PathError::Invalid);
    }

    rest.expect_empty().map_err(|_| PathError::Trailing)?;
    Ok(mailbox(path))
}

/// Split an argument at its first whitespace
fn split_path(mut argument: &[u8]) -> (&[u8], &[u8]) {
    let path = argument.take_while(|c, _| !c.is_ascii_whitespace());
    (path, argument)
}

/// Check that `path` is a non-empty, bracketed, printable address
fn is_valid_path(path: &[u8]) -> bool {
    path.len() >= 3
        && path.starts_with(b"<")
        && path.ends_with(b">")
        && path[1..path.len() - 1].iter().all(|&c| c.is_ascii_graphic() && c != b'<' && c != b'>')
}

/// Extract the mailbox from a valid path, dropping any source route
fn mailbox(path: &[u8]) -> &[u8] {
    let inner = &path[1..path.len() - 1];

    match memchr::memrchr(b':', inner) {
        Some(colon) => &inner[colon + 1..],
        None => inner,
    }
}
