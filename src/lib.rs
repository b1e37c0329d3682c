// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! POP3 and SMTP session servers sharing a mail store

mod macros;
mod util;

pub mod config;
pub mod line;
pub mod net;
pub mod pop3;
pub mod server;
pub mod smtp;
pub mod store;
