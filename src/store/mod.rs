// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Mail storage
//!
//! Sessions only see the [`MailStore`] trait. Implementations must make
//! concurrent access to a single user's mailbox safe on their own; sessions do
//! no locking.

use std::{collections::BTreeSet, io::{self, BufRead}, path::Path, sync::Arc};
use thiserror::Error;

pub use self::{fs::FsStore, memory::MemoryStore};

mod fs;
mod memory;

pub type StoreRef = Arc<dyn MailStore>;

/// Mailbox identifiers a message is addressed to
pub type RecipientSet = BTreeSet<String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A single stored message, as listed by [`MailStore::list_messages`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Store-specific identifier, stable for the lifetime of the message
    pub id: String,
    /// Size in octets
    pub size: u64,
}

pub trait MailStore: Send + Sync {
    /// Check that a user exists and, when `password` is given, that it matches
    fn is_valid_user(&self, name: &str, password: Option<&str>) -> bool;

    /// List messages in a user's mailbox, in delivery order
    fn list_messages(&self, user: &str) -> Result<Vec<Message>, StoreError>;

    fn open_message(&self, user: &str, id: &str) -> io::Result<Box<dyn BufRead + Send>>;

    fn remove_messages(&self, user: &str, ids: &[&str]) -> Result<(), StoreError>;

    /// Deliver a copy of the message stored at `message` to every recipient
    fn save_message(&self, message: &Path, recipients: &RecipientSet) -> Result<(), StoreError>;
}

/// A user's mailbox, opened for a POP3 session
///
/// Deletions are only marked. They reach the store through
/// [`Mailbox::commit`]; dropping a mailbox discards them.
pub struct Mailbox {
    user: String,
    store: StoreRef,
    messages: Vec<Entry>,
}

struct Entry {
    message: Message,
    deleted: bool,
}

impl Mailbox {
    pub fn load(store: StoreRef, user: &str) -> Result<Mailbox, StoreError> {
        let messages = store.list_messages(user)?
            .into_iter()
            .map(|message| Entry { message, deleted: false })
            .collect();

        Ok(Mailbox {
            user: user.to_owned(),
            store,
            messages,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Number of messages, including those marked as deleted
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages not marked as deleted
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Total size of messages not marked as deleted
    pub fn total_size(&self) -> u64 {
        self.iter().map(|(_, message)| message.size).sum()
    }

    /// Messages not marked as deleted, with their (zero-based) index
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Message)> + '_ {
        self.messages.iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(index, entry)| (index, &entry.message))
    }

    /// Get a message, unless it doesn't exist or is marked as deleted
    pub fn message_at(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
            .filter(|entry| !entry.deleted)
            .map(|entry| &entry.message)
    }

    /// Mark a message as deleted
    ///
    /// Returns `false` if the message doesn't exist or was already marked.
    pub fn mark_deleted(&mut self, index: usize) -> bool {
        match self.messages.get_mut(index) {
            Some(entry) if !entry.deleted => {
                entry.deleted = true;
                true
            }
            _ => false,
        }
    }

    pub fn reset_deleted(&mut self) {
        for entry in &mut self.messages {
            entry.deleted = false;
        }
    }

    pub fn content_reader(&self, index: usize) -> io::Result<Box<dyn BufRead + Send>> {
        let message = self.message_at(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such message"))?;
        self.store.open_message(&self.user, &message.id)
    }

    /// Remove messages marked as deleted from the store
    pub fn commit(self) -> Result<(), StoreError> {
        let deleted = self.messages.iter()
            .filter(|entry| entry.deleted)
            .map(|entry| entry.message.id.as_str())
            .collect::<Vec<_>>();

        if deleted.is_empty() {
            return Ok(());
        }

        log::debug!("removing {} messages from {}'s mailbox", deleted.len(), self.user);
        self.store.remove_messages(&self.user, &deleted)
    }
}
