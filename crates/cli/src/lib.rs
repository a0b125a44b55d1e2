pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "renta",
    about = "Renta operator CLI",
    long_about = "Operate the renta sales assistant: migrations, catalog index rebuilds, and readiness checks.",
    after_help = "Examples:\n  renta doctor --json\n  renta migrate\n  renta reindex --force"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Build or refresh the catalog index from the source document")]
    Reindex {
        #[arg(long, help = "Discard the persisted artifact and re-embed the whole catalog")]
        force: bool,
    },
    #[command(about = "Validate config, catalog source, index artifact, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Reindex { force } => commands::reindex::run(force),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
