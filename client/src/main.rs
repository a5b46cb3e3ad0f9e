//! Utility for poking a heater supervisor from the command line

use std::{io::Write, process::ExitCode, thread::sleep, time::Duration};

use clap::Parser;
use client::{ClientError, PidHeaterClient};
use proto::{Access, Request, Subject, Verb};
use shared::DEFAULT_PORT;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Supervisor to connect to
    #[arg(long, value_name = "host", default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, value_name = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Zone to address, `*` for registry queries
    key: String,

    /// What to address, e.g. `PD:SETP`
    command: String,

    /// Value to write before reading back
    arg: Option<String>,

    /// Allow for continuous monitoring
    #[arg(short, long)]
    continuous: bool,
}

fn parse_command(command: &str) -> Result<(Subject, Verb, Access), ClientError> {
    let (subject, verb) = command
        .split_once(':')
        .ok_or_else(|| ClientError::Parse(command.to_owned()))?;

    let subject: Subject = subject.parse()?;
    let verb: Verb = verb.parse()?;

    let access = subject
        .access(verb)
        .ok_or_else(|| ClientError::Parse(command.to_owned()))?;

    Ok((subject, verb, access))
}

fn run(cli: Cli) -> Result<(), ClientError> {
    let (subject, verb, access) = parse_command(&cli.command)?;

    let mut client = PidHeaterClient::connect((cli.host.as_str(), cli.port))?;

    // # 1: Write, then make sure it was taken
    let write = match (access, &cli.arg) {
        (Access::Command, _) => Some(Request::command(&cli.key, subject, verb)),
        (_, Some(arg)) => Some(Request::set(&cli.key, subject, verb, arg)),
        (_, None) => None,
    };

    if let Some(write) = write {
        println!("{}", write);
        client.request(&write)?;

        let barrier = Request::query(&cli.key, Subject::PD, Verb::REGT);
        client.request(&barrier)?;

        if let Some(error) = client.take_errors().into_iter().next() {
            return Err(ClientError::Remote(error));
        }
    }

    if access == Access::Command {
        return Ok(());
    }

    // # 2: Read back
    let query = Request::query(&cli.key, subject, verb);

    loop {
        let reply = client.request(&query)?.unwrap_or_default();

        for event in client.take_events() {
            eprintln!("\n{}", event);
        }

        if !cli.continuous {
            println!("{}:{}->{}", subject, verb, reply);
            break;
        }

        print!("\r{}:{}->{}   ", subject, verb, reply);
        std::io::stdout().flush().unwrap_or_default();

        sleep(Duration::from_millis(100));
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {} {}", e.kind(), e);
            ExitCode::FAILURE
        }
    }
}
