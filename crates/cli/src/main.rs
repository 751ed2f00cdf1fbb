use clap::{Parser, Subcommand};

mod commands;
mod runtime;

use commands::{CheckConfigArgs, ScanArgs, ServeArgs};

#[derive(Parser)]
#[command(name = "arbys")]
#[command(about = "Multi-provider odds arbitrage scanner", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web API server
    Serve(ServeArgs),
    /// Run one fetch-detect cycle and print the opportunities
    Scan(ScanArgs),
    /// Load and validate configuration
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let writer = std::sync::Mutex::new(file);
            if cli.log_json {
                builder.json().with_writer(writer).init();
            } else {
                builder.with_ansi(false).with_writer(writer).init();
            }
        }
        None if cli.log_json => builder.json().with_writer(std::io::stderr).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }

    match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await?,
        Commands::Scan(args) => commands::run_scan(args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(args)?,
    }

    Ok(())
}
