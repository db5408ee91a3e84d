//! Work a command handler hands to the host control loop instead of doing it
//! on the polling task.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{BridgeContext, ReplySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
}

impl ServerAction {
    const fn verb(self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::Stop => "Stopping",
            Self::Restart => "Restarting",
        }
    }
}

/// Requests a command handler can make of the host control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// Tear the bridge down and activate it again from disk.
    Reload,
    /// Start, stop or restart the game server; the outcome is reported to `reply`.
    Server {
        action: ServerAction,
        reply: ReplySink,
    },
}

#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<HostRequest>,
}

impl HostHandle {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<HostRequest>) -> Self {
        Self { tx }
    }

    pub fn request(&self, request: HostRequest) {
        if let Err(e) = self.tx.send(request) {
            warn!(request = ?e.0, "Host control loop is gone; request dropped");
        }
    }
}

/// Runs a server lifecycle action and replies with its outcome. Restarts wait
/// for the server to go down, so the host runs this off its own loop.
///
/// # Errors
///
/// Returns the gateway error when the outcome cannot be delivered.
pub async fn run_server_action(
    ctx: &BridgeContext,
    action: ServerAction,
    reply: &ReplySink,
) -> Result<()> {
    let result = match action {
        ServerAction::Start => ctx.game.start().await,
        ServerAction::Stop => ctx.game.stop().await,
        ServerAction::Restart => ctx.game.restart().await,
    };
    let verb = action.verb();
    match result {
        Ok(()) => {
            info!(?action, "Server lifecycle command done");
            ctx.gateway.reply(reply, format!("{verb} the server.")).await
        }
        Err(e) => {
            warn!(?action, error = %e, "Server lifecycle command failed");
            ctx.gateway
                .reply(reply, format!("{verb} the server failed: {e}"))
                .await
        }
    }
}
