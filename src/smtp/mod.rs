// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP mail submission

pub use self::{proto::{Connection, SmtpError}, server::start};

pub mod command;
pub mod data;
mod proto;
mod server;
pub mod syntax;
