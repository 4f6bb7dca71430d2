//! cccc CLI
//!
//! Command-line front end for the cccc daemon. Results are printed to stdout
//! as JSON; logs go to stderr.

use std::path::PathBuf;
use std::time::Duration;

use cccc_sdk::{
    CcccClient, ClientOptions, CompatibilityOptions, EventsStreamOptions, MessageOptions,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use miette::IntoDiagnostic;
use serde_json::{Map, Value};

#[derive(Parser, Debug)]
#[command(name = "cccc")]
#[command(about = "Talk to the cccc daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file (default: ~/.config/cccc/client.kdl when present)
    #[arg(short, long)]
    config: Option<String>,

    /// cccc home directory (overrides config and $CCCC_HOME)
    #[arg(long)]
    home: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the daemon
    Ping,

    /// Check that the daemon meets version, capability and op requirements
    Compat {
        /// Minimum IPC version
        #[arg(long, default_value_t = 1)]
        ipc_v: i64,

        /// Capability that must be enabled (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,

        /// Operation that must exist (repeatable)
        #[arg(long = "op")]
        ops: Vec<String>,
    },

    /// Call any daemon operation with JSON arguments
    Call {
        /// Operation name, e.g. group_show
        op: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },

    /// Send a message to a group
    Send {
        group: String,
        text: String,

        /// Recipient (repeatable)
        #[arg(long)]
        to: Vec<String>,

        #[arg(long, default_value = "normal")]
        priority: String,
    },

    /// Print a group's event stream until interrupted
    Stream {
        group: String,

        /// Event kind to include (repeatable)
        #[arg(long = "kind")]
        kinds: Vec<String>,

        /// Resume after this event id
        #[arg(long)]
        since_event_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = build_client(&cli)?;

    match cli.command {
        Commands::Ping => cmd_ping(&client).await,
        Commands::Compat {
            ipc_v,
            capabilities,
            ops,
        } => cmd_compat(&client, ipc_v, capabilities, ops).await,
        Commands::Call { op, args } => cmd_call(&client, &op, &args).await,
        Commands::Send {
            group,
            text,
            to,
            priority,
        } => cmd_send(&client, &group, text, to, priority).await,
        Commands::Stream {
            group,
            kinds,
            since_event_id,
        } => cmd_stream(&client, group, kinds, since_event_id).await,
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}

/// Merge the config file with command-line overrides
fn build_client(cli: &Cli) -> miette::Result<CcccClient> {
    let config_path = cli.config.as_deref().map(expand);
    let config = cccc_config::load_config(config_path.as_deref())?;

    let mut options: ClientOptions = config.into();
    if let Some(home) = &cli.home {
        options.cccc_home = Some(expand(home));
        // An explicit home means discovery, not the configured endpoint
        options.endpoint = None;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        options.timeout = Some(Duration::from_millis(timeout_ms));
    }

    let client = CcccClient::new(options);
    tracing::debug!("Using daemon endpoint {}", client.endpoint());
    Ok(client)
}

fn print_json(value: &Value) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn parse_args(raw: &str) -> miette::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).into_diagnostic()? {
        Value::Object(map) => Ok(map),
        other => Err(miette::miette!(
            "arguments must be a JSON object, got {}",
            other
        )),
    }
}

async fn cmd_ping(client: &CcccClient) -> miette::Result<()> {
    let result = client.ping().await.into_diagnostic()?;
    print_json(&Value::Object(result))
}

async fn cmd_compat(
    client: &CcccClient,
    ipc_v: i64,
    capabilities: Vec<String>,
    ops: Vec<String>,
) -> miette::Result<()> {
    let mut options = CompatibilityOptions::default().require_ipc_v(ipc_v);
    for capability in capabilities {
        options = options.require_capability(capability);
    }
    options.require_ops = ops;

    let ping = client.assert_compatible(&options).await.into_diagnostic()?;
    print_json(&Value::Object(ping))
}

async fn cmd_call(client: &CcccClient, op: &str, raw_args: &str) -> miette::Result<()> {
    let args = parse_args(raw_args)?;
    let response = client.call_raw(op, args).await.into_diagnostic()?;
    print_json(&serde_json::to_value(&response).into_diagnostic()?)
}

async fn cmd_send(
    client: &CcccClient,
    group: &str,
    text: String,
    to: Vec<String>,
    priority: String,
) -> miette::Result<()> {
    let message = MessageOptions::new(text).to(to).priority(priority);
    let result = client.send(group, &message, None).await.into_diagnostic()?;
    print_json(&Value::Object(result))
}

async fn cmd_stream(
    client: &CcccClient,
    group: String,
    kinds: Vec<String>,
    since_event_id: Option<String>,
) -> miette::Result<()> {
    let mut options = EventsStreamOptions::new(group);
    if !kinds.is_empty() {
        options.kinds = Some(kinds);
    }
    options.since_event_id = since_event_id;

    let events = client.events_stream(&options).await.into_diagnostic()?;
    let mut stream = events.into_stream();

    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(item) => {
                    let item = item.into_diagnostic()?;
                    println!("{}", item.to_value());
                }
                None => {
                    tracing::info!("Stream closed by daemon");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing stream");
                break;
            }
        }
    }

    Ok(())
}
