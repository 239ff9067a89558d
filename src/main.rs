//! Osaurus gateway client demo binary.
//!
//! Connects to a running OpenClaw gateway, resolves a device token from the
//! standard credential chain, and drives one of a few diagnostic commands.
//! The real functionality lives in the library crate; this binary is a thin
//! CLI shell around it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use osaurus_gateway::{
    credentials::{resolve_token, standard_sources},
    state::GatewayState,
    GatewayClient,
};

#[derive(Parser)]
#[command(name = "osaurus-gateway")]
#[command(version)]
#[command(about = "Gateway client core for the OpenClaw agent runtime")]
struct Cli {
    /// Override the gateway URL (defaults to the persisted state's effective URL).
    #[arg(long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print connection-state transitions until interrupted.
    Watch,
    /// Connect, list sessions, and exit.
    Sessions,
    /// Connect, fetch presence, and exit.
    Presence,
}

fn config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".openclaw")
}

fn launch_agent_plist() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library/LaunchAgents/com.osaurus.gateway.plist")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config_dir = config_dir();
    let state = GatewayState::load(&state_path(&config_dir)).await;
    let url = cli.url.unwrap_or_else(|| state.effective_gateway_url());

    let sources = standard_sources(&config_dir, &launch_agent_plist());
    let token = resolve_token(&sources).await.unwrap_or_default();
    if token.is_empty() {
        log::warn!("no device token found in any credential source; connecting unauthenticated");
    }

    let client = GatewayClient::new(url, Arc::new(move || token.clone()));
    let mut state_rx = client.watch_state();

    let run_handle = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    match cli.command {
        Commands::Watch => {
            println!("Watching connection state (Ctrl-C to exit)...");
            loop {
                if state_rx.changed().await.is_err() {
                    break;
                }
                println!("{:?}", state_rx.borrow().clone());
            }
        }
        Commands::Sessions => {
            wait_for_connection(&mut state_rx).await;
            let facade = client.facade().await.context("no active connection")?;
            let sessions = facade.sessions_list(20, true, true, false, false).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Commands::Presence => {
            wait_for_connection(&mut state_rx).await;
            let facade = client.facade().await.context("no active connection")?;
            let rows = facade.system_presence().await?;
            for row in rows {
                println!("{} ({})", row.identity(), row.host.as_deref().unwrap_or("?"));
            }
        }
    }

    client.shutdown();
    let _ = run_handle.await;
    Ok(())
}

fn state_path(config_dir: &std::path::Path) -> PathBuf {
    GatewayState::default_path(config_dir)
}

async fn wait_for_connection(state_rx: &mut tokio::sync::watch::Receiver<osaurus_gateway::ConnectionState>) {
    use osaurus_gateway::ConnectionState;
    while !matches!(*state_rx.borrow(), ConnectionState::Connected | ConnectionState::Reconnected) {
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}
