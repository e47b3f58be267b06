//! Cloudebug CLI
//!
//! Command-line host for the Cloudebug remote debugger. Connects to a
//! Cloudebug server, manages breakpoints and shows the hits they record.

use clap::{Parser, Subcommand};
use cloudebug_core::events::{EventPump, StdoutEventSink};
use cloudebug_core::{ClientConfig, DebugClient};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

/// Cloudebug - remote breakpoints for running programs
///
/// Breakpoints never pause the program; each trigger records the values of
/// the breakpoint's expressions as a hit.
#[derive(Parser, Debug)]
#[command(name = "cloudebug")]
#[command(version, about, long_about = None)]
struct Args {
    /// Server address (host:port); blank means the configured default
    #[arg(short, long, env = "CLOUDEBUG_ADDRESS")]
    address: Option<String>,

    /// Server password
    #[arg(short, long, env = "CLOUDEBUG_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Handshake timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List the server's breakpoints
    List,

    /// Add a breakpoint
    Add {
        file: String,
        line: u32,
        /// Only record a hit when this condition holds
        #[arg(long)]
        condition: Option<String>,
        /// Expression to evaluate on every hit (repeatable)
        #[arg(short, long = "expression")]
        expressions: Vec<String>,
    },

    /// Remove a breakpoint
    Remove { id: u64 },

    /// Remove the breakpoint on a line, or add one if there is none
    Toggle {
        file: String,
        line: u32,
        #[arg(long)]
        condition: Option<String>,
        #[arg(short, long = "expression")]
        expressions: Vec<String>,
    },

    /// Show the hits recorded by a breakpoint
    Hits { id: u64 },

    /// Show the breakpoint on a line together with its hits
    Reveal { file: String, line: u32 },

    /// Show the gutter markers of a file
    Gutter { file: String },

    /// Stream breakpoint and hit changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ClientConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ClientConfig::new(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_handshake_timeout_ms(timeout_ms);
    }

    let json_output = matches!(args.format, OutputFormat::Json);
    let event_sink = StdoutEventSink::new(json_output);
    let client = DebugClient::new(config);

    // Subscribed before connecting so the initial list is streamed too.
    let pump = matches!(args.action, Action::Watch).then(|| EventPump::new(&client));

    let address = client
        .config()
        .session
        .resolve_address(args.address.as_deref())
        .to_string();
    if let Err(e) = client.try_connect(Some(&address), &args.password).await {
        eprintln!("Error: failed to connect to the Cloudebug server at {address}: {e}");
        return ExitCode::FAILURE;
    }

    let result = match pump {
        Some(pump) => commands::watch(&client, pump, &event_sink).await,
        None => commands::run(&client, args.action, &event_sink).await,
    };
    client.disconnect();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
