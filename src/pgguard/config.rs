//! Configuration (§6): listener address and logging, loaded from `pgguard.yaml`. Replaces
//! `riverdb::config`'s `unsafe static mut` singleton with a safe `OnceLock` — the config is
//! set once at startup and read-only thereafter, so the extra safety costs nothing.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::{debug, info, info_span};

use crate::pgguard::error::Result;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5432
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { host: default_host(), port: default_port(), log_level: default_log_level() }
    }
}

impl Settings {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// The process-wide settings, set once by `load_config` at startup.
pub fn config() -> &'static Settings {
    SETTINGS.get().expect("load_config must run before config() is called")
}

/// Loads `pgguard.yaml`, searching the current directory and its ancestors (mirroring
/// `riverdb::config::load::find_config_file`, minus the `~/.config` and `/etc` fallbacks
/// this single-binary gateway doesn't need) and the path given as the first command-line
/// argument. Falls back to defaults if no file is found.
pub fn load_config() -> Result<&'static Settings> {
    let _span = info_span!("loading config file");
    let settings = match find_config_file("pgguard.yaml") {
        Some(path) => {
            info!(config_path = %path.to_string_lossy(), "found config file");
            let raw = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&raw)?
        }
        None => {
            info!("no config file found; using defaults");
            Settings::default()
        }
    };
    Ok(SETTINGS.get_or_init(|| settings))
}

fn find_config_file(config_name: &str) -> Option<PathBuf> {
    if let Some(path) = env::args().nth(1) {
        debug!("using config path passed on command line");
        return Some(PathBuf::from(path));
    }

    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        loop {
            let candidate = Path::join(dir, config_name);
            if candidate.exists() {
                return Some(candidate);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
    None
}
