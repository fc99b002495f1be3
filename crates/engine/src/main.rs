mod cmd;
mod config;
mod error;
mod executor_api;
mod fleet_api;
mod payload;
mod response;

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the workspace provisioning API
    Fleet(cmd::FleetArgs),
    /// Serve the sandboxed code execution API (runs inside provisioned machines)
    Executor(cmd::ExecutorArgs),
    /// Write a default engine.yaml
    Init(cmd::InitArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fleet(args) => cmd::run_fleet(args).await,
        Command::Executor(args) => cmd::run_executor(args).await,
        Command::Init(args) => cmd::run_init(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
