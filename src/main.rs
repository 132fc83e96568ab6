mod cli;

use clap::Parser as _;
use log::{error, warn};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::main]
async fn main() -> ExitCode {
    let arguments = cli::Cli::parse();
    init_logger(arguments.verbose);

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);

    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if handler_stop.load(Ordering::Relaxed) {
                warn!("interrupted twice, exiting now");
                std::process::exit(130);
            }
            warn!("stopping at the next episode, press ctrl-c again to exit immediately");
            handler_stop.store(true, Ordering::Relaxed);
        }
    });

    match cli::run(arguments, stop).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let colors = fern::colors::ColoredLevelConfig::new()
        .error(fern::colors::Color::Red)
        .warn(fern::colors::Color::Yellow)
        .info(fern::colors::Color::Green)
        .debug(fern::colors::Color::Cyan);

    let result = fern::Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{time}] [{level:<5}] {message}",
                time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level = colors.color(record.level()),
            ))
        })
        .chain(std::io::stderr())
        .apply();

    if let Err(error) = result {
        eprintln!("logger initialization failed: {error}");
    }
}
