//! Environment-driven configuration shared by both serving surfaces.

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_AMQP_PORT: u16 = 5672;

/// The resolved service configuration. Built once at startup and passed
/// to the model and both surfaces at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// File root containing the `static/` web UI directory.
    pub home: PathBuf,

    /// Directory the persisted `data.json` (and log files) live in.
    pub data_dir: PathBuf,

    pub http_port: u16,
    pub amqp_port: u16,

    /// URLs advertised back to clients in the `/api/data` config block.
    /// These may differ from the listening ports when the service sits
    /// behind a proxy or a container port mapping.
    pub http_url: String,
    pub amqp_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {name}: {source}")]
    InvalidPort {
        name: &'static str,
        value: String,
        source: ParseIntError,
    },
}

impl Config {
    /// Reads the `STAGGER_*` environment variables, falling back to the
    /// defaults described in the README.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolves a configuration from an arbitrary variable source. The
    /// CLI layers flag overrides on top of the environment through this,
    /// and tests use it to avoid touching process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = lookup("STAGGER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let data_dir = lookup("STAGGER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("data"));

        let http_port = parse_port("STAGGER_HTTP_PORT", &lookup, DEFAULT_HTTP_PORT)?;
        let amqp_port = parse_port("STAGGER_AMQP_PORT", &lookup, DEFAULT_AMQP_PORT)?;

        let http_url = lookup("STAGGER_HTTP_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", http_port));
        let amqp_url = lookup("STAGGER_AMQP_URL")
            .unwrap_or_else(|| format!("amqp://localhost:{}", amqp_port));

        Ok(Config {
            home,
            data_dir,
            http_port,
            amqp_port,
            http_url,
            amqp_url,
        })
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.home.join("static")
    }
}

fn parse_port(
    name: &'static str,
    lookup: impl Fn(&str) -> Option<String>,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse().map_err(|source| ConfigError::InvalidPort {
            name,
            value,
            source,
        }),
        None => Ok(default),
    }
}
