// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! POP3 mailbox retrieval (RFC 1939)

pub use self::{proto::{Connection, Pop3Error}, server::start};

pub mod command;
mod proto;
mod server;
