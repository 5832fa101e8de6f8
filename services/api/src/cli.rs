use crate::commands::{run_effective, run_import, EffectiveArgs, ImportArgs};
use crate::server;
use aso_bible::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "ASO Bible Registry",
    about = "Serve and query the ASO Bible rule and KPI override registry",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Resolve one entity's effective value from a registry seed
    Effective(EffectiveArgs),
    /// Apply an override CSV to a registry seed and print the resulting overrides
    Import(ImportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Effective(args) => run_effective(args),
        Command::Import(args) => run_import(args),
    }
}
