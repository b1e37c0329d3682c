// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Protocol-agnostic TCP server

use anyhow::{Context, Result};
use std::{io, net::Ipv6Addr};
use thiserror::Error;
use tokio::{io::{AsyncRead, AsyncWrite}, net::TcpListener};

use crate::{net::{self, LineReader, Response}, util};

/// A line-oriented protocol session, driven by [`serve`]
pub trait Session: Send {
    /// Response to send when a client connects
    fn connect(&mut self) -> Response;

    /// Handle a single line, including its terminator
    ///
    /// Returns `None` if this line requires no response.
    fn line(&mut self, line: &[u8]) -> Option<Response>;

    /// Response to send when the connection is terminated abruptly
    fn close(&mut self) -> Response;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not read from client")]
    Read(#[source] io::Error),
    #[error("could not send to client")]
    Send(#[source] io::Error),
}

/// Listen on `port` and serve each connection with a fresh session
pub async fn start<S, F>(name: &str, port: u16, max_line_length: usize, new_session: F) -> Result<()>
where
    S: Session + 'static,
    F: Fn() -> S,
{
    let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("could not bind TCP socket on [{}]:{}", Ipv6Addr::UNSPECIFIED, port))?;

    log::info!("Started {name} server on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept()
            .await
            .context("could not accept connection")?;

        log::debug!("accepted connection from {addr}");
        let session = new_session();

        tokio::spawn(async move {
            if let Err(err) = serve(session, socket, max_line_length).await {
                log::error!("error serving {addr}: {err:?}");
            }
        });
    }
}

/// Drive a single session over a stream until either side closes it
pub async fn serve<S, T>(mut session: S, stream: T, max_line_length: usize) -> Result<(), SessionError>
where
    S: Session,
    T: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = LineReader::new(reader, max_line_length);

    let greeting = session.connect();
    net::send(&mut writer, greeting.data).await.map_err(SessionError::Send)?;

    if greeting.close_connection {
        return Ok(());
    }

    loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                log::debug!("client closed connection");
                return Ok(());
            }
            Err(err) => {
                let _ = net::send(&mut writer, session.close().data).await;
                return Err(SessionError::Read(err));
            }
        };

        log::trace!(">> {}", util::maybe_ascii(line));

        if let Some(response) = session.line(line) {
            net::send(&mut writer, response.data).await.map_err(SessionError::Send)?;

            if response.close_connection {
                return Ok(());
            }
        }
    }
}
