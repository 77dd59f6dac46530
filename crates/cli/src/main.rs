use clap::{Parser, Subcommand};

mod commands;

use commands::{ReplayArgs, ThresholdsArgs};

#[derive(Parser)]
#[command(name = "straddle")]
#[command(about = "Dynamic ATM straddle trend controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a tick file through a paper-traded instance
    Replay(ReplayArgs),
    /// Print decision points for every leg around an ATM
    Thresholds(ThresholdsArgs),
    /// Print the effective configuration after file and env overrides
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

fn init_logging(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Replay(args) => init_logging(args.log_file.as_deref())?,
        _ => init_logging(None)?,
    }

    match cli.command {
        Commands::Replay(args) => {
            commands::run_replay(&args).await?;
        }
        Commands::Thresholds(args) => {
            commands::run_thresholds(&args)?;
        }
        Commands::CheckConfig { config } => {
            let config = straddle_core::ConfigLoader::load_from(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
