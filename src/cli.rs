//! Defines Stagger's CLI through clap types. There are no subcommands:
//! the one entry point starts both serving surfaces.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use thiserror::Error;

use crate::{
    amqpserver::AmqpServer,
    app::App,
    config::{Config, ConfigError},
    events,
    model::Model,
    persist::SaveWorker,
    web::HttpServer,
};

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

/// Command line options that Stagger accepts, defined using the clap crate.
#[derive(Debug, Parser)]
#[clap(name = "Stagger", version, about)]
pub struct Options {
    #[clap(flatten)]
    pub global: GlobalOptions,

    /// The IP address both surfaces listen on. Defaults to all interfaces.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// The HTTP port to listen on, overriding STAGGER_HTTP_PORT.
    #[clap(long)]
    pub http_port: Option<u16>,

    /// The AMQP port to listen on, overriding STAGGER_AMQP_PORT.
    #[clap(long)]
    pub amqp_port: Option<u16>,

    /// Directory the data file is kept in, overriding STAGGER_DATA_DIR.
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// File root containing the static web UI, overriding STAGGER_HOME.
    #[clap(long)]
    pub home: Option<PathBuf>,
}

impl Options {
    /// Resolves the effective configuration: flags take precedence over
    /// the environment, and every default cascades from the result.
    pub fn config(&self) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| {
            let flag = match name {
                "STAGGER_HOME" => self.home.as_ref().map(|path| path.display().to_string()),
                "STAGGER_DATA_DIR" => self.data_dir.as_ref().map(|path| path.display().to_string()),
                "STAGGER_HTTP_PORT" => self.http_port.map(|port| port.to_string()),
                "STAGGER_AMQP_PORT" => self.amqp_port.map(|port| port.to_string()),
                _ => None,
            };

            flag.or_else(|| std::env::var(name).ok())
        })
    }

    pub fn run(self, config: Config) -> anyhow::Result<()> {
        let address = self.address.unwrap_or(DEFAULT_BIND_ADDRESS.into());
        serve(config, address)
    }
}

fn serve(config: Config, address: IpAddr) -> anyhow::Result<()> {
    fs_err::create_dir_all(&config.data_dir)?;

    let (event_sender, event_receiver) = events::channel();
    let (save_signal, save_receiver) = crossbeam_channel::bounded(1);

    let model = Arc::new(Model::new(
        config.data_file(),
        &config,
        event_sender,
        save_signal,
    ));

    model.load().with_context(|| {
        format!("Failed to load data file {}", config.data_file().display())
    })?;

    let _save_worker = SaveWorker::start(Arc::clone(&model), save_receiver);

    let amqp_address = SocketAddr::from((address, config.amqp_port));
    AmqpServer::new(amqp_address, event_receiver).start();

    let http_address = SocketAddr::from((address, config.http_port));
    log::info!("Listening for HTTP connections on http://{}", http_address);

    let app = Arc::new(App::new(config, model));
    HttpServer::new(app).start(http_address)
}

#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Sets verbosity level. Can be specified multiple times.
    #[clap(long("verbose"), short, global(true), action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Set color behavior. Valid values are auto, always, and never.
    #[clap(long("color"), global(true), default_value("auto"))]
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Copy)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ColorChoiceParseError {
                attempted: source.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("Invalid color choice '{attempted}'. Valid values are: auto, always, never")]
pub struct ColorChoiceParseError {
    attempted: String,
}
