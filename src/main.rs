use beacon_listener::app::{self, AdvertiseOptions, Cli, Command, RunError};
use beacon_listener::scanner::BackendSource;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `shutdown` on Ctrl-C.
fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupted, stopping"),
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        shutdown.cancel();
    });
}

#[cfg(feature = "bluer")]
async fn advertise(options: AdvertiseOptions, shutdown: CancellationToken) -> Result<(), RunError> {
    let mut advertiser = beacon_listener::advertiser::BluezAdvertiser::new().await?;
    app::run_advertise(options, &mut advertiser, shutdown).await
}

#[cfg(not(feature = "bluer"))]
async fn advertise(_options: AdvertiseOptions, _shutdown: CancellationToken) -> Result<(), RunError> {
    Err(beacon_listener::advertiser::AdvertiseError::Bluetooth(
        "advertising requires the 'bluer' feature".to_string(),
    )
    .into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let result = match cli.command {
        Some(Command::Advertise(options)) => advertise(options, shutdown).await,
        command => {
            let options = match command {
                Some(Command::Scan(options)) => options,
                _ => cli.scan,
            };
            let source = BackendSource::new(options.backend);
            let mut stdout = std::io::stdout();
            app::run_scan_with_io(options, &source, shutdown, &mut stdout).await
        }
    };

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
