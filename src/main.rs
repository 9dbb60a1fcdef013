use std::sync::Arc;

use archivist::config::Config;
use archivist::{logging, service};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SERVICE_ENV: &str = "ARCHIVIST_SERVICE";

#[derive(Debug, Parser)]
#[command(
    name = "archivist",
    version = VERSION,
    about = "Discord message archive with operator SQL and remote shutdown"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Connect to Discord and archive messages until stopped
    Start,
    /// Run a SQL statement against the local archive
    Query {
        #[arg(trailing_var_arg = true, required = true)]
        sql: Vec<String>,
    },
    /// Show recent log lines
    Logs {
        #[arg(short = 'n', long, default_value_t = 200)]
        lines: usize,
    },
    /// Show version
    Version,
}

fn print_version() {
    println!("archivist {VERSION}");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(MainCommand::Start) => {}
        Some(MainCommand::Query { sql }) => {
            let config = Config::load()?;
            println!("{}", service::run_local_query(&config, &sql.join(" ")).await?);
            return Ok(());
        }
        Some(MainCommand::Logs { lines }) => {
            let config = Config::load()?;
            for line in logging::read_recent_log_lines(&config.log_dir(), lines)? {
                println!("{line}");
            }
            return Ok(());
        }
        Some(MainCommand::Version) => {
            print_version();
            return Ok(());
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        }
    }

    let config = Config::load()?;
    if std::env::var(SERVICE_ENV).is_ok() {
        logging::init_file_logging(&config.log_dir())?;
    } else {
        logging::init_console_logging();
    }
    info!("Starting archivist {VERSION}");

    let bridge = Arc::new(service::build_bridge(&config)?);
    service::run_foreground(bridge, config.stop_grace()).await
}
