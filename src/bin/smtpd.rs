use anyhow::Result;
use std::sync::Arc;

use maildrop::{config, smtp, store::FsStore};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = config::load()?;
    let store = Arc::new(FsStore::new(&config.mail_root));

    smtp::start(&config, store).await
}
