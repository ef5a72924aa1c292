//! `tether` command-line client.
//!
//! Reads and writes keys through [`KvClient`] using a TOML settings file,
//! and edits that file's connection settings.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tether_client::{
    init_tracing, ErrorPolicy, InitOutcome, KeyLookup, KvClient, TelemetryConfig, TetherResult,
    WriteOutcome,
};
use tether_core::AuthToken;
use tether_storage::{FileConfigStore, RoutingBackend};

// ============================================================================
// CLI TYPES
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Resilient remote key-value store client")]
struct Cli {
    /// Settings file.
    #[arg(long, value_name = "PATH", env = "TETHER_CONFIG", default_value = "tether.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and provision the user table.
    Init,
    /// Print the value stored under a key.
    Get { key: String },
    /// Store a value under a key.
    Set { key: String, value: String },
    /// Enable remote storage and initialize.
    Enable,
    /// Disable remote storage.
    Disable,
    /// Set the database endpoint URI.
    Endpoint { uri: String },
    /// Set the database auth token.
    Token { token: String },
    /// Print the user id and the namespace derived from it.
    Whoami,
}

// ============================================================================
// ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(&TelemetryConfig::default()) {
        eprintln!("tether: {e}");
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tether: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> TetherResult<ExitCode> {
    let store = Arc::new(FileConfigStore::open(&cli.config)?);
    let settings = store.client_settings();
    let backend = Arc::new(RoutingBackend::new(&settings)?);
    let client = KvClient::new(store, backend, settings)?;

    match cli.command {
        Command::Init => {
            let outcome = client.init(ErrorPolicy::Propagate).await?;
            println!("{}", describe(outcome));
        }
        Command::Get { key } => {
            client.init(ErrorPolicy::Propagate).await?;
            match client.lookup(&key, ErrorPolicy::Propagate).await? {
                KeyLookup::Found(value) => println!("{value}"),
                KeyLookup::Missing => {
                    eprintln!("tether: no value stored under '{key}'");
                    return Ok(ExitCode::from(1));
                }
                KeyLookup::Disabled => {
                    eprintln!("tether: remote storage is disabled");
                    return Ok(ExitCode::from(2));
                }
                KeyLookup::Unavailable => {
                    eprintln!("tether: database unavailable");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Set { key, value } => {
            client.init(ErrorPolicy::Propagate).await?;
            match client
                .store_key_value(&key, &value, ErrorPolicy::Propagate)
                .await?
            {
                WriteOutcome::Stored => {}
                WriteOutcome::Disabled => {
                    eprintln!("tether: remote storage is disabled");
                    return Ok(ExitCode::from(2));
                }
                WriteOutcome::Abandoned => {
                    eprintln!("tether: database unavailable");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Enable => {
            client.set_enabled(true).await?;
            let outcome = client
                .wait_for_pending_init()
                .await
                .unwrap_or(InitOutcome::Failed);
            println!("enabled; {}", describe(outcome));
        }
        Command::Disable => {
            client.set_enabled(false).await?;
            println!("disabled");
        }
        Command::Endpoint { uri } => {
            client.set_endpoint(uri)?;
        }
        Command::Token { token } => {
            client.set_token(AuthToken::new(token))?;
        }
        Command::Whoami => {
            let user = client.user()?;
            println!("user_id:   {}", user.user_id);
            println!("namespace: {}", user.namespace);
            println!("table:     {}", user.table);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(outcome: InitOutcome) -> &'static str {
    match outcome {
        InitOutcome::Disabled => "remote storage is disabled",
        InitOutcome::Initialized => "connected, table provisioned",
        InitOutcome::Reinitialized => "connected",
        InitOutcome::Failed => "initialization failed, see log",
    }
}
