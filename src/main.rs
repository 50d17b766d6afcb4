//! Binary entrypoint for the Meshbridge CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the bridge until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `check` - validate the configuration (file plus environment) and print the channel map
//!
//! See the library crate docs for module-level details: `meshbridge::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use meshbridge::config::{BridgeSettings, Config};

#[derive(Parser)]
#[command(name = "meshbridge")]
#[command(about = "Relay between a Meshtastic mesh and Telegram chats")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0); overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a starter configuration file
    Init,
    /// Validate the configuration and print the channel map
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_logging(None, cli.verbose);
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                anyhow::bail!("{} already exists; not overwriting", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Fill in the [telegram] section or set TELEGRAM_BOT_TOKEN and friends");
        }
        Commands::Check => {
            let config = load_config(&cli.config, cli.verbose).await?;
            let settings = load_settings(config, None)?;
            println!("Configuration OK");
            println!("  device: {} @ {} baud", settings.port, settings.baud_rate);
            for (channel, chat) in settings.channel_pairs() {
                println!("  mesh channel {} <-> chat {}", channel, chat);
            }
            println!("  admin: {}", settings.admin_user_id);
            println!("  data dir: {}", settings.data_dir.display());
        }
        Commands::Start { port } => {
            let config = load_config(&cli.config, cli.verbose).await?;
            info!("Starting Meshbridge v{}", env!("CARGO_PKG_VERSION"));
            let settings = match load_settings(config, port) {
                Ok(s) => s,
                Err(e) => {
                    error!("{:#}", e);
                    return Err(e);
                }
            };
            run_bridge(settings).await?;
        }
    }

    Ok(())
}

/// Read the config file, or fall back to defaults when it does not exist, and start
/// logging from the result.
async fn load_config(path: &str, verbosity: u8) -> Result<Config> {
    match Config::load_optional(path).await? {
        Some(config) => {
            init_logging(Some(&config), verbosity);
            Ok(config)
        }
        None => {
            let config = Config::default();
            init_logging(Some(&config), verbosity);
            warn!("No config file at {}; using defaults and environment variables", path);
            Ok(config)
        }
    }
}

/// Environment overrides, then validation. `port` from the command line wins over both.
fn load_settings(mut config: Config, port: Option<String>) -> Result<BridgeSettings> {
    config
        .apply_process_env()
        .context("invalid environment override")?;
    if let Some(port) = port {
        config.meshtastic.port = port;
    }
    config.validate().context("invalid configuration")
}

#[cfg(all(feature = "serial", feature = "telegram"))]
async fn run_bridge(settings: BridgeSettings) -> Result<()> {
    use meshbridge::bridge::BridgeServer;
    use meshbridge::chat::telegram::TelegramClient;
    use meshbridge::meshtastic::serial::SerialConnector;
    use std::sync::Arc;

    let client = TelegramClient::new(&settings.bot_token);
    let source = Box::new(client.poller(settings.poll_timeout));
    let connector = Arc::new(SerialConnector::new(&settings.port, settings.baud_rate));
    let server = BridgeServer::new(settings, Arc::new(client), connector)?;
    server.run(source).await
}

#[cfg(not(all(feature = "serial", feature = "telegram")))]
async fn run_bridge(_settings: BridgeSettings) -> Result<()> {
    anyhow::bail!("`start` requires the `serial` and `telegram` features; rebuild with default features")
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config
        .and_then(|c| c.logging.file.as_deref())
        .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());

    match log_file {
        Some(file) => {
            let file = std::sync::Mutex::new(file);
            // Mirror to the console only when someone is watching it
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
