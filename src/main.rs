//! Runs every validation scenario.

use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use mini_dl::{HarnessConfig, scenarios};

fn main() {
    let cfg = match HarnessConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    setup_logging(cfg.verbose);

    info!(seed = cfg.seed, "running validation scenarios");
    match scenarios::run_all(&cfg) {
        Ok(0) => info!("all scenarios finished"),
        Ok(failures) => {
            error!("{failures} scenario(s) showed uncorrect behavior");
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber is already installed");
    }
}
