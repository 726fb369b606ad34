use std::{any::Any, env, panic, path::PathBuf, process};

use backtrace::Backtrace;
use clap::Parser;

use libazul::cli::Options;
use libazul::{logging, Config};

/// Turns whatever was handed to `panic!` into something printable.
fn panic_payload_text(payload: &dyn Any) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<opaque panic payload>".to_owned()
    }
}

fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|location| format!("{}:{}", location.file(), location.line()))
            .unwrap_or_else(|| "<unknown location>".to_owned());

        log::error!(
            "Internal error: panicked at {}: {}",
            location,
            panic_payload_text(panic_info.payload())
        );
        log::error!(
            "This is a bug in Azul {}. Please report it at {}/issues and include the output above.",
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        );

        match env::var_os("RUST_BACKTRACE") {
            Some(value) if value == "1" => eprintln!("{:?}", Backtrace::new()),
            _ => log::error!("Rerun with RUST_BACKTRACE=1 to capture a backtrace."),
        }

        process::exit(1);
    }));
}

fn main() {
    install_panic_hook();

    let options = Options::parse();

    // The config is re-read by each subcommand; this early peek only feeds
    // logging setup.
    let config = Config::load();

    let log_dir = if env::var("AZUL_NO_FILE_LOG").is_ok() {
        None
    } else {
        Some(PathBuf::from(".azul").join("logs"))
    };

    let command_name = format!("azul-{}", options.subcommand.command_name());

    let _log_guard = logging::init_logging(
        options.global.verbosity,
        options.global.color,
        config.debug_mode,
        log_dir.as_deref(),
        &command_name,
    );

    if let Err(err) = options.run() {
        log::error!("{:?}", err);
        process::exit(1);
    }
}
