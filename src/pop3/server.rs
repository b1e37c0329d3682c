// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! POP3 server

use anyhow::Result;
use std::sync::Arc;

use crate::{config::Config, net::Response, server::{self, Session}, store::StoreRef};
use super::proto::Connection;

pub async fn start(config: &Config, store: StoreRef) -> Result<()> {
    let host: Arc<str> = config.hostname.as_deref().unwrap_or("localhost").into();

    server::start("POP3", config.port, config.max_line_length, move || {
        Connection::new(host.clone(), store.clone())
    }).await
}

impl Session for Connection {
    fn connect(&mut self) -> Response {
        Connection::connect(self)
    }

    fn line(&mut self, line: &[u8]) -> Option<Response> {
        Some(Connection::line(self, line))
    }

    fn close(&mut self) -> Response {
        Connection::close(self)
    }
}
