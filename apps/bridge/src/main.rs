//! XCOM bridge entry point.

mod app;
mod config;
mod estimate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{BridgeConfig, Overrides};

#[derive(Debug, Parser)]
#[command(name = "xcom-bridge", version, about = "WebSocket to serial bridge for the XCOM STM32 board")]
struct Cli {
    /// Serial device path (e.g. /dev/ttyUSB0). Without one the bridge runs simulated.
    #[arg(long, env = "XCOM_SERIAL_PORT")]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Interface for the WebSocket server.
    #[arg(long)]
    host: Option<String>,

    /// WebSocket server port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// TOML configuration file.
    #[arg(long, env = "XCOM_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print estimated transfer times for a file at the standard baud rates.
    Estimate {
        /// File to estimate.
        file: PathBuf,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            serial_port: self.port.clone(),
            baud: self.baud,
            host: self.host.clone(),
            ws_port: self.ws_port,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    config.apply(cli.overrides());
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Some(Command::Estimate { file }) = &cli.command {
        return estimate::run(file, &config);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting XCOM bridge");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("bridge shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_become_overrides() {
        let cli = Cli::parse_from([
            "xcom-bridge",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "921600",
            "--ws-port",
            "9000",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(overrides.baud, Some(921_600));
        assert_eq!(overrides.ws_port, Some(9000));
        assert!(overrides.host.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn estimate_subcommand_parses() {
        let cli = Cli::parse_from(["xcom-bridge", "estimate", "fw.bin"]);
        assert!(matches!(
            cli.command,
            Some(Command::Estimate { ref file }) if file == &PathBuf::from("fw.bin")
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
