use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};

use crate::net::DEFAULT_MAX_LINE_LENGTH;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Port to listen on, always taken from the command line
    #[serde(skip)]
    pub port: u16,
    /// Host name to present to clients
    pub hostname: Option<String>,
    /// Root directory of the mail store
    pub mail_root: PathBuf,
    /// Directory for messages being received
    pub spool_dir: Option<PathBuf>,
    pub max_line_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 0,
            hostname: None,
            mail_root: PathBuf::from("mail"),
            spool_dir: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl Config {
    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Mail server
#[derive(FromArgs)]
struct Args {
    /// port to listen on
    #[argh(positional)]
    port: u16,
    /// configuration file to use
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// root directory of the mail store
    #[argh(option)]
    mail_root: Option<PathBuf>,
    /// directory for messages being received
    #[argh(option)]
    spool_dir: Option<PathBuf>,
}

pub fn load() -> Result<Config> {
    from_args(argh::from_env())
}

fn from_args(args: Args) -> Result<Config> {
    let mut config = match args.config {
        None => Config::default(),
        Some(path) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("could not read {}", path.display()))?;
            toml::from_str(&data)
                .with_context(|| format!("could not parse {}", path.display()))?
        }
    };

    config.port = args.port;

    if let Some(root) = args.mail_root {
        config.mail_root = root;
    }

    if let Some(dir) = args.spool_dir {
        config.spool_dir = Some(dir);
    }

    if config.hostname.is_none() {
        config.hostname = resolve_hostname();
    }

    Ok(config)
}

/// Find this machine's host name
fn resolve_hostname() -> Option<String> {
    let name = env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())?;
    let name = name.trim();

    if name.is_empty() {
        log::warn!("could not determine host name");
        None
    } else {
        Some(name.to_owned())
    }
}
