// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use std::{
    collections::{HashMap, hash_map::Entry},
    fs,
    io::{self, BufRead, Cursor},
    path::Path,
    sync::{PoisonError, RwLock},
};

use super::{MailStore, Message, RecipientSet, StoreError};

/// Mail store keeping everything in memory
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
}

#[derive(Default)]
struct User {
    password: String,
    messages: Vec<(String, Vec<u8>)>,
    next_id: u64,
}

impl User {
    fn push(&mut self, content: Vec<u8>) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.messages.push((id.clone(), content));
        id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user, or change an existing user's password
    pub fn add_user(&self, name: &str, password: &str) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);

        match users.entry(name.to_owned()) {
            Entry::Occupied(mut entry) => entry.get_mut().password = password.to_owned(),
            Entry::Vacant(entry) => {
                entry.insert(User {
                    password: password.to_owned(),
                    ..User::default()
                });
            }
        }
    }

    /// Add a message to a user's mailbox, returning its ID
    pub fn add_message(&self, user: &str, content: impl Into<Vec<u8>>) -> Result<String, StoreError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users.get_mut(user).ok_or_else(|| StoreError::UnknownUser(user.to_owned()))?;
        Ok(user.push(content.into()))
    }

    /// Contents of all messages in a user's mailbox
    pub fn messages(&self, user: &str) -> Vec<Vec<u8>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);

        users.get(user)
            .map(|user| user.messages.iter().map(|(_, content)| content.clone()).collect())
            .unwrap_or_default()
    }
}

impl MailStore for MemoryStore {
    fn is_valid_user(&self, name: &str, password: Option<&str>) -> bool {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);

        match (users.get(name), password) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(user), Some(password)) => user.password == password,
        }
    }

    fn list_messages(&self, user: &str) -> Result<Vec<Message>, StoreError> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let user = users.get(user).ok_or_else(|| StoreError::UnknownUser(user.to_owned()))?;

        Ok(user.messages.iter()
            .map(|(id, content)| Message {
                id: id.clone(),
                size: content.len() as u64,
            })
            .collect())
    }

    fn open_message(&self, user: &str, id: &str) -> io::Result<Box<dyn BufRead + Send>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);

        users.get(user)
            .and_then(|user| user.messages.iter().find(|(message, _)| message == id))
            .map(|(_, content)| Box::new(Cursor::new(content.clone())) as Box<dyn BufRead + Send>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no message {id}")))
    }

    fn remove_messages(&self, user: &str, ids: &[&str]) -> Result<(), StoreError> {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        let user = users.get_mut(user).ok_or_else(|| StoreError::UnknownUser(user.to_owned()))?;
        user.messages.retain(|(id, _)| !ids.contains(&id.as_str()));
        Ok(())
    }

    fn save_message(&self, message: &Path, recipients: &RecipientSet) -> Result<(), StoreError> {
        let content = fs::read(message)?;
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(missing) = recipients.iter().find(|name| !users.contains_key(name.as_str())) {
            return Err(StoreError::UnknownUser(missing.clone()));
        }

        for name in recipients {
            if let Some(user) = users.get_mut(name) {
                user.push(content.clone());
            }
        }

        Ok(())
    }
}
