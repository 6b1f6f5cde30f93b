mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use commands::graph::GraphArgs;
use commands::run::RunArgs;
use commands::validate::ValidateArgs;

/// Compose layered unit configuration and run it in dependency order
#[derive(Parser, Debug)]
#[command(name = "strata", version, about)]
struct Cli {
    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Validate(ValidateArgs),
    Graph(GraphArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await?,
        Commands::Validate(args) => commands::validate::execute(args)?,
        Commands::Graph(args) => commands::graph::execute(args)?,
    };

    std::process::exit(code);
}
