use clap::Parser;
use isoprep::cli::cmd::Commands;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct CommandLine {
    #[clap(subcommand)]
    command: Commands,
}

pub fn main() -> ExitCode {
    // Parse command line options before we configure logging so we can set the
    // default level
    let command_line = CommandLine::parse();

    let default_filter = match &command_line.command {
        Commands::Build { debug: true, .. } => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &command_line.command {
        Commands::Build { .. } => isoprep::cli::cmd::build::run(command_line.command),
        Commands::Answer { .. } => isoprep::cli::cmd::answer::run(command_line.command),
        Commands::Inspect { .. } => isoprep::cli::cmd::inspect::run(command_line.command),
    }
}
