use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use echolens_core::config::Config;
use echolens_core::protocol::StreamMode;

mod logging;
mod stream;

#[derive(Parser)]
#[command(
    name = "echolens",
    about = "Live speech transcription and translation for wearable displays",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream audio to the service and print results
    Stream {
        /// Raw PCM file to stream ("-" or omitted reads stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Protocol mode: session or raw
        #[arg(long)]
        mode: Option<StreamMode>,

        /// Source language
        #[arg(long)]
        lang: Option<String>,

        /// Target language for translation
        #[arg(long)]
        translate_to: Option<String>,

        /// Session id (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Send as fast as possible instead of at capture speed
        #[arg(long)]
        no_realtime: bool,

        /// Also print partial results
        #[arg(long)]
        partials: bool,

        /// Milliseconds to wait for trailing results after the audio ends
        #[arg(long, default_value_t = 3000)]
        linger_ms: u64,
    },

    /// Check that the service answers (raw mode ping)
    Ping {
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show client status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration and validation results
    Show,
    /// Get a specific config value
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose)?;

    match cli.command {
        Commands::Stream {
            file,
            mode,
            lang,
            translate_to,
            session_id,
            no_realtime,
            partials,
            linger_ms,
        } => {
            let realtime = !no_realtime && config.realtime_capture();
            stream::run_stream(
                &config,
                stream::StreamOptions {
                    file,
                    mode,
                    lang,
                    translate_to,
                    session_id,
                    realtime,
                    partials,
                    linger: Duration::from_millis(linger_ms),
                },
            )
            .await?;
        }
        Commands::Ping { timeout_ms } => {
            stream::run_ping(&config, Duration::from_millis(timeout_ms)).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    eprintln!("warning: {warning}");
                }
                for error in &errors {
                    eprintln!("error: {error}");
                }
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("Key not found: {key}");
                    std::process::exit(1);
                }
            },
        },
        Commands::Status => {
            println!("EchoLens v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!(
                "Service: {}",
                config.service_url().unwrap_or("(not configured)")
            );
            println!("Mode: {}", config.stream_mode());
            println!("Language: {}", config.lang());
            if let Some(target) = config.translate_to() {
                println!("Translate to: {target}");
            }
            let (warnings, errors) = config.validate();
            println!(
                "Config: {} warning(s), {} error(s)",
                warnings.len(),
                errors.len()
            );
        }
    }

    Ok(())
}
