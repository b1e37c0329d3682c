// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::{Component, Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use super::{MailStore, Message, RecipientSet, StoreError};

/// Name of the user table inside the store's root directory
pub const USERS_FILE: &str = "users.txt";

/// Mail store backed by a directory tree
///
/// The root directory holds `users.txt`, with one `name password` pair per
/// line, and one directory per user holding one file per message. Messages
/// are listed in file name order; delivered messages are named after the time
/// of their delivery so that this is also their delivery order.
pub struct FsStore {
    root: PathBuf,
}

/// Distinguishes messages delivered within the same clock tick
static DELIVERY_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStore { root: root.into() }
    }

    fn users(&self) -> io::Result<HashMap<String, String>> {
        let data = fs::read_to_string(self.root.join(USERS_FILE))?;

        Ok(data.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let name = fields.next()?;
                let password = fields.next().unwrap_or_default();
                Some((name.to_owned(), password.to_owned()))
            })
            .collect())
    }

    fn mailbox_dir(&self, user: &str) -> Result<PathBuf, StoreError> {
        let mut components = Path::new(user).components();

        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(user)),
            _ => Err(StoreError::UnknownUser(user.to_owned())),
        }
    }

    fn message_path(&self, user: &str, id: &str) -> io::Result<PathBuf> {
        let dir = self.mailbox_dir(user)
            .map_err(|err| io::Error::new(io::ErrorKind::NotFound, err.to_string()))?;

        if id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no message {id}")));
        }

        Ok(dir.join(id))
    }

    /// Copy one message into a mailbox directory
    fn deliver(&self, message: &Path, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let mut incoming = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(dir)?;
        io::copy(&mut File::open(message)?, incoming.as_file_mut())?;
        incoming.as_file().sync_all()?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        let name = format!(
            "{stamp:020}.{}.{:08}.eml",
            std::process::id(),
            DELIVERY_COUNTER.fetch_add(1, Ordering::Relaxed),
        );
        let path = dir.join(name);

        incoming.persist_noclobber(&path).map_err(|err| err.error)?;
        Ok(path)
    }
}

impl MailStore for FsStore {
    fn is_valid_user(&self, name: &str, password: Option<&str>) -> bool {
        let users = match self.users() {
            Ok(users) => users,
            Err(err) => {
                log::warn!("could not read {}: {err}", self.root.join(USERS_FILE).display());
                return false;
            }
        };

        match (users.get(name), password) {
            (None, _) => false,
            (Some(_), None) => self.mailbox_dir(name).is_ok(),
            (Some(expected), Some(password)) => expected == password,
        }
    }

    fn list_messages(&self, user: &str) -> Result<Vec<Message>, StoreError> {
        let dir = self.mailbox_dir(user)?;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // A user who never received mail has no directory yet
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut messages = vec![];

        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;

            if !metadata.is_file() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(id) if !id.starts_with('.') => messages.push(Message {
                    id,
                    size: metadata.len(),
                }),
                Ok(_) => {}
                Err(name) => log::warn!("skipping message with non UTF-8 name {name:?}"),
            }
        }

        messages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(messages)
    }

    fn open_message(&self, user: &str, id: &str) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.message_path(user, id)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn remove_messages(&self, user: &str, ids: &[&str]) -> Result<(), StoreError> {
        for id in ids {
            match fs::remove_file(self.message_path(user, id)?) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    log::warn!("message {id} of {user} disappeared before removal");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    fn save_message(&self, message: &Path, recipients: &RecipientSet) -> Result<(), StoreError> {
        for user in recipients {
            let dir = self.mailbox_dir(user)?;
            let path = self.deliver(message, &dir)?;
            log::debug!("delivered {} to {user}", path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn store() -> (tempfile::TempDir, FsStore) {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(USERS_FILE),
            "# name password\nbob hunter2\n\ncarol  swordfish \n../evil x\n",
        ).unwrap();
        let store = FsStore::new(root.path());
        (root, store)
    }

    #[test]
    fn reads_user_table() {
        let (_root, store) = store();

        assert!(store.is_valid_user("bob", None));
        assert!(store.is_valid_user("bob", Some("hunter2")));
        assert!(store.is_valid_user("carol", Some("swordfish")));
        assert!(!store.is_valid_user("carol", Some("hunter2")));
        assert!(!store.is_valid_user("dave", None));
        assert!(!store.is_valid_user("../evil", None));
        assert!(!store.is_valid_user("#", None));
    }

    #[test]
    fn missing_user_table_rejects_everyone() {
        let root = tempfile::tempdir().unwrap();
        assert!(!FsStore::new(root.path()).is_valid_user("bob", None));
    }

    #[test]
    fn delivers_and_lists_in_order() {
        let (_root, store) = store();
        assert!(store.list_messages("bob").unwrap().is_empty());

        for body in ["first\r\n", "second message\r\n"] {
            let mut spool = tempfile::NamedTempFile::new().unwrap();
            spool.write_all(body.as_bytes()).unwrap();
            let recipients = ["bob".to_string(), "carol".to_string()].into_iter().collect();
            store.save_message(spool.path(), &recipients).unwrap();
        }

        let messages = store.list_messages("bob").unwrap();
        assert_eq!(messages.iter().map(|m| m.size).collect::<Vec<_>>(), vec![7, 16]);
        assert_eq!(store.list_messages("carol").unwrap().len(), 2);

        let mut content = String::new();
        store.open_message("bob", &messages[1].id).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "second message\r\n");

        store.remove_messages("bob", &[messages[0].id.as_str()]).unwrap();
        assert_eq!(store.list_messages("bob").unwrap(), vec![messages[1].clone()]);
        assert!(store.open_message("bob", "../users.txt").is_err());
    }
}
