// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP server

use anyhow::{Context, Result};
use std::{path::Path, sync::Arc};

use crate::{config::Config, net::Response, server::{self, Session}, store::StoreRef};
use super::proto::Connection;

pub async fn start(config: &Config, store: StoreRef) -> Result<()> {
    let host: Option<Arc<str>> = config.hostname.as_deref().map(Into::into);
    let spool_dir: Arc<Path> = config.spool_dir().into();

    std::fs::create_dir_all(&spool_dir)
        .with_context(|| format!("could not create spool directory {}", spool_dir.display()))?;

    server::start("SMTP", config.port, config.max_line_length, move || {
        Connection::new(host.clone(), store.clone(), spool_dir.clone())
    }).await
}

impl Session for Connection {
    fn connect(&mut self) -> Response {
        Connection::connect(self)
    }

    fn line(&mut self, line: &[u8]) -> Option<Response> {
        Connection::line(self, line)
    }

    fn close(&mut self) -> Response {
        Connection::close(self)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use crate::store::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn serves_a_session() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("bob", "secret");
        let spool = tempfile::tempdir().unwrap();

        let (mut client, stream) = tokio::io::duplex(4096);
        let session = Connection::new(Some("mx.test".into()), store.clone(), spool.path().into());
        let server = tokio::spawn(server::serve(session, stream, 1024));

        client.write_all(concat!(
            "HELO client.test\r\n",
            "MAIL FROM:<alice@client.test>\r\n",
            "RCPT TO:<bob>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
            ".\r\n",
            "QUIT\r\n",
        ).as_bytes()).await.unwrap();

        let mut transcript = String::new();
        client.read_to_string(&mut transcript).await.unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(transcript, concat!(
            "220 mx.test Simple Mail Transfer Service Ready\r\n",
            "250 OK mx.test greets client.test\r\n",
            "250 OK\r\n",
            "250 OK\r\n",
            "354 OK Start mail input\r\n",
            "250 OK\r\n",
            "221 OK\r\n",
        ));
        assert_eq!(store.messages("bob"), vec![b"Subject: hi\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn content_line_at_length_limit() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("bob", "secret");
        let spool = tempfile::tempdir().unwrap();

        let (mut client, stream) = tokio::io::duplex(4096);
        let session = Connection::new(None, store.clone(), spool.path().into());
        let server = tokio::spawn(server::serve(session, stream, 16));

        client.write_all(concat!(
            "HELO a.test\r\n",
            "MAIL FROM:<>\r\n",
            "RCPT TO:<bob>\r\n",
            "DATA\r\n",
            "0123456789abcde\r\n",
            ".\r\n",
            "QUIT\r\n",
        ).as_bytes()).await.unwrap();

        let mut transcript = String::new();
        client.read_to_string(&mut transcript).await.unwrap();
        server.await.unwrap().unwrap();

        assert!(transcript.ends_with("354 OK Start mail input\r\n250 OK\r\n221 OK\r\n"));
        assert_eq!(store.messages("bob"), vec![b"0123456789abcde\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn disconnect_during_data_discards_spool() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("bob", "secret");
        let spool = tempfile::tempdir().unwrap();

        let (mut client, stream) = tokio::io::duplex(4096);
        let session = Connection::new(None, store.clone(), spool.path().into());
        let server = tokio::spawn(server::serve(session, stream, 1024));

        client.write_all(concat!(
            "HELO a.test\r\n",
            "MAIL FROM:<>\r\n",
            "RCPT TO:<bob>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
        ).as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let mut transcript = String::new();
        client.read_to_string(&mut transcript).await.unwrap();
        server.await.unwrap().unwrap();

        assert!(transcript.ends_with("354 OK Start mail input\r\n"));
        assert!(store.messages("bob").is_empty());
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn overlong_lines_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let spool = tempfile::tempdir().unwrap();

        let (mut client, stream) = tokio::io::duplex(4096);
        let session = Connection::new(None, store, spool.path().into());
        let server = tokio::spawn(server::serve(session, stream, 16));

        client.write_all(b"NOOP 0123456789abcdef\r\nQUIT\r\n").await.unwrap();

        let mut transcript = String::new();
        client.read_to_string(&mut transcript).await.unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(transcript, concat!(
            "220\r\n",
            "500 Syntax error, command unrecognized or too long\r\n",
            "500 Syntax error, command unrecognized or too long\r\n",
            "221 OK\r\n",
        ));
    }
}
