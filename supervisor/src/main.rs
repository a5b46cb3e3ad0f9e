//! Heater supervisor daemon

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use shared::{DEFAULT_BIND, DEFAULT_PORT, RECV_TIMEOUT_MS};
use supervisor::{Config, Error, Settings, Supervisor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to serve the control port on
    #[arg(short, long, value_name = "addr", default_value = DEFAULT_BIND)]
    bind: String,

    /// Control port, 0 picks any free port
    #[arg(short, long, value_name = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Oven description in JSON, the built-in three zone oven if absent
    #[arg(short, long, value_name = "file")]
    config: Option<PathBuf>,

    /// Drop a client that has been silent this long
    #[arg(
        long,
        value_name = "ms",
        default_value_t = RECV_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    recv_timeout_ms: u64,

    /// Print the effective oven description and exit
    #[arg(long)]
    dump_config: bool,
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if cli.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let zones = config.build()?;

    let settings = Settings {
        bind: cli.bind,
        port: cli.port,
        recv_timeout: Duration::from_millis(cli.recv_timeout_ms),
    };

    let mut supervisor = Supervisor::spawn(zones, &settings)?;

    info!(addr = %supervisor.local_addr(), "ready");

    supervisor.wait();

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "*FAULT* supervisor failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_timeout_must_be_positive() {
        assert!(Cli::try_parse_from(["supervisor", "--recv-timeout-ms", "0"]).is_err());

        let cli = Cli::try_parse_from(["supervisor", "--recv-timeout-ms", "250"]).unwrap();
        assert_eq!(cli.recv_timeout_ms, 250);

        let cli = Cli::try_parse_from(["supervisor"]).unwrap();
        assert_eq!(cli.recv_timeout_ms, RECV_TIMEOUT_MS);
        assert_eq!(cli.port, DEFAULT_PORT);
    }
}
