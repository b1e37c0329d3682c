// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Receiving message content during the DATA phase

use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::store::{MailStore, RecipientSet};
use super::proto::SmtpError;

/// Message content being spooled to disk
///
/// The spool file is removed when the stager is dropped, whether or not the
/// message was delivered.
pub struct DataStager {
    spool: BufWriter<NamedTempFile>,
    recipients: RecipientSet,
    /// Did the previous line end with CRLF?
    after_crlf: bool,
}

impl DataStager {
    pub fn create(dir: &Path, recipients: RecipientSet) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("spool-")
            .tempfile_in(dir)?;

        log::trace!("spooling message to {}", file.path().display());

        Ok(DataStager {
            spool: BufWriter::new(file),
            recipients,
            after_crlf: true,
        })
    }

    /// Create a stager whose spool file rejects every write
    #[cfg(test)]
    pub(crate) fn read_only(dir: &Path, recipients: RecipientSet) -> io::Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("spool-")
            .tempfile_in(dir)?
            .into_temp_path();
        let file = std::fs::File::open(&path)?;

        Ok(DataStager {
            spool: BufWriter::with_capacity(0, NamedTempFile::from_parts(file, path)),
            recipients,
            after_crlf: true,
        })
    }

    pub fn recipients(&self) -> &RecipientSet {
        &self.recipients
    }

    /// Append a raw line of content
    ///
    /// Returns `true` if this line terminated the message, in which case it is
    /// not part of the content.
    pub fn push(&mut self, line: &[u8]) -> io::Result<bool> {
        if self.after_crlf && line == b".\r\n" {
            return Ok(true);
        }

        let content = match line.strip_prefix(b".") {
            Some(rest) if self.after_crlf => rest,
            _ => line,
        };

        self.spool.write_all(content)?;
        self.after_crlf = line.ends_with(b"\r\n");
        Ok(false)
    }

    /// Hand the complete message over to the store
    pub fn deliver(self, store: &dyn MailStore) -> Result<(), SmtpError> {
        let spool = self.spool.into_inner()
            .map_err(|err| SmtpError::Local(err.into_error()))?;

        store.save_message(spool.path(), &self.recipients)
            .map_err(SmtpError::Delivery)
    }
}
