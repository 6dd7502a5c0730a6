mod assemble_command;
mod run_command;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "lembar", about = "Lembar: WhatsApp bot that turns photos into a PDF")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/lembar/).
    #[arg(long, global = true, env = "LEMBAR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to WhatsApp and serve conversations (default).
    Run,
    /// Assemble local image files into a PDF without any transport.
    Assemble {
        /// Output file.
        #[arg(short, long, default_value = "output.pdf")]
        output: PathBuf,
        /// Images, one page each, in order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<lembar_config::LembarConfig> {
    match &cli.config {
        Some(path) => lembar_config::load_config(path),
        None => Ok(lembar_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "lembar starting");

    let config = load_config(&cli)?;
    match cli.command {
        None | Some(Commands::Run) => run_command::run_bot(config).await,
        Some(Commands::Assemble { output, inputs }) => {
            assemble_command::assemble_files(&config, &inputs, &output).await
        },
    }
}
