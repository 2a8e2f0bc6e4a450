use clap::Parser;
use minutes_scribe::config::{Config, Secrets};
use minutes_scribe::{logging, service};
use std::path::PathBuf;
use std::process::ExitCode;

/// Meeting-minutes automation service.
#[derive(Debug, Parser)]
#[command(name = "minutes-scribe", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,

    /// Override the configured log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Secrets come from the environment; a local env file seeds it if
    // present.
    let _ = dotenv::dotenv();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let secrets = match Secrets::from_env() {
        Ok(secrets) => secrets,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = logging::init(&config.logging, cli.log_level.as_deref()) {
        eprintln!("Configuration error: {}", e);
        return ExitCode::from(1);
    }

    // Registered before anything is logged.
    logging::register_secret(&secrets.bot_token);
    logging::register_secret(&secrets.llm_api_key);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(service::run(config, secrets)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_startup() => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}
