use std::{env, panic, process};

use backtrace::Backtrace;
use clap::Parser;

use libstagger::cli::Options;
use libstagger::logging;

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        let message = match panic_info.payload().downcast_ref::<&str>() {
            Some(&message) => message.to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(message) => message.clone(),
                None => "<no message>".to_string(),
            },
        };

        log::error!(
            "Stagger crashed! You are running Stagger {}.",
            env!("CARGO_PKG_VERSION")
        );
        log::error!("This is probably a Stagger bug.");
        log::error!("");
        log::error!("Details: {}", message);

        if let Some(location) = panic_info.location() {
            log::error!("in file {} on line {}", location.file(), location.line());
        }

        let should_backtrace = env::var("RUST_BACKTRACE")
            .map(|var| var == "1")
            .unwrap_or(false);

        if should_backtrace {
            eprintln!("{:?}", Backtrace::new());
        } else {
            eprintln!(
                "note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace."
            );
        }

        process::exit(1);
    }));

    let options = Options::parse();

    let config = match options.config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    };

    let file_log_dir = if env::var("STAGGER_NO_FILE_LOG").is_ok() {
        None
    } else {
        Some(config.data_dir.join("logs"))
    };

    let _log_guard = logging::init_logging(
        options.global.verbosity,
        options.global.color,
        file_log_dir.as_deref(),
    );

    if let Err(err) = options.run(config) {
        log::error!("{:?}", err);
        process::exit(1);
    }
}
