use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rangelab::configuration::config::Config;
use rangelab::controller::controller_handler::Controller;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "rangelab")]
#[command(version)]
#[command(about = "Lab instance orchestration and template versioning engine")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, env = "RANGELAB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
enum Command {
    /// Serve the HTTP interface and sweep expired instances (default).
    Serve,
    /// Check the host environment and exit non-zero when it is not ready.
    Preflight,
    /// Deactivate expired instances once and exit.
    Sweep,
}

fn load_config(path: Option<&PathBuf>) -> Config {
    let loaded = match path {
        Some(path) => Config::from_file(path),
        None => {
            info!("No configuration file given, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate().map(|_| config)
        }
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref());
    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    match args.command.unwrap_or(Command::Serve) {
        Command::Preflight => {
            let report = controller.preflight_report().await;
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Unable to render preflight report: {}", e),
            }
            if !report.ready {
                std::process::exit(2);
            }
        }
        Command::Sweep => match controller.sweep().await {
            Ok(report) => info!(
                "Sweep finished: {} expired, {} deactivated, {} failed",
                report.expired, report.deactivated, report.failed
            ),
            Err(e) => {
                error!("Sweep failed: {}", e);
                std::process::exit(1);
            }
        },
        Command::Serve => {
            let sweeper = controller.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    if let Err(e) = sweeper.sweep().await {
                        warn!("Expiry sweep failed: {}", e);
                    }
                }
            });

            info!("Spawning the controller");
            if let Err(e) = controller.run().await {
                error!("Error occured in the controller process: {}, exiting...", e);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_defaults_to_serve() {
        let args = Args::try_parse_from(["rangelab", "--config", "/etc/rangelab.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/rangelab.toml")));
        assert!(args.command.is_none());

        let args = Args::try_parse_from(["rangelab", "sweep"]).unwrap();
        assert_eq!(args.command, Some(Command::Sweep));
    }
}
