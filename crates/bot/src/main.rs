mod activation;
mod logging;

use std::{
    io::{self, BufRead as _},
    path::PathBuf,
    sync::Arc,
    thread,
};

use anyhow::{Context as _, Result};
use bridge_core::{HostHandle, HostRequest, VERSION, run_server_action};
use clap::Parser;
use minecraft_link::Launcher;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    activation::{Bridge, Settings},
    logging::init_tracing,
};

#[derive(Parser, Debug)]
#[command(
    name = "telegram-chat",
    version,
    about = "Bridges a Minecraft server's chat with a Telegram group"
)]
struct Args {
    /// YAML config file; written with defaults when missing
    #[arg(long, env = "TGCHAT_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Directory holding bindings.json and ban_list.json
    #[arg(long, env = "TGCHAT_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Bot token (overrides telegram.token; prompted for when missing)
    #[arg(long, env = "TGCHAT_TOKEN")]
    token: Option<String>,

    /// Seconds to wait for the bot to connect before giving up
    #[arg(long, env = "TGCHAT_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present so clap and RUST_LOG can pick up env vars.
    let _ = dotenvy::dotenv();
    init_tracing()?;
    let args = Args::parse();
    info!(version = VERSION, config = %args.config.display(), "Starting telegram-chat");

    let mut settings = Settings {
        config_path: args.config,
        data_dir: args.data_dir,
        token: args.token,
        connect_timeout_secs: args.connect_timeout_secs,
        prompted_token: None,
    };
    let (host_tx, mut host_rx) = mpsc::unbounded_channel();
    let host = HostHandle::new(host_tx);
    // Outlives every activation so a reload keeps track of the server process.
    let launcher = Arc::new(Launcher::new());

    let mut bridge = Bridge::activate(&mut settings, host.clone(), Arc::clone(&launcher))
        .await
        .context("activating the bridge")?;
    // After activation: the token prompt must have the terminal to itself.
    let mut console = spawn_console_reader();

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Cannot listen for Ctrl-C");
                }
                info!("Shutting down");
                break;
            }
            Some(request) = host_rx.recv() => match request {
                HostRequest::Reload => {
                    info!("Reloading");
                    bridge.deactivate();
                    bridge = Bridge::activate(&mut settings, host.clone(), Arc::clone(&launcher))
                        .await
                        .context("re-activating the bridge")?;
                }
                HostRequest::Server { action, reply } => {
                    let ctx = bridge.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = run_server_action(&ctx, action, &reply).await {
                            warn!(?action, error = %e, "Reporting server lifecycle outcome failed");
                        }
                    });
                }
            },
            Some(event) = bridge.game_events.recv() => {
                if let Err(e) = bridge.forwarder.on_game_event(event).await {
                    warn!(error = %e, "Forwarding game event failed");
                }
            }
            Some(line) = console.recv() => {
                if let Err(e) = bridge.forwarder.on_console_line(&line).await {
                    warn!(error = %e, "Console command failed");
                }
            }
        }
    }

    bridge.deactivate();
    Ok(())
}

/// Host console input, read on a plain thread so a pending read never holds
/// up runtime shutdown.
fn spawn_console_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = thread::Builder::new()
        .name("console-input".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Reading console input failed");
                        break;
                    }
                }
            }
            debug!("Console input closed");
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Console input is unavailable");
    }
    rx
}
