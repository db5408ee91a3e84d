use core::time::Duration;
use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bridge_core::{GameServer, config::MinecraftSettings};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{launcher::Launcher, rcon::RconClient};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);
const OPERATOR_LEVEL: u8 = 2;

#[derive(Debug, Deserialize)]
struct OpEntry {
    name: String,
    #[serde(default)]
    level: u8,
}

/// A vanilla-compatible server reached through its RCON console.
#[derive(Debug)]
pub struct RconServer {
    rcon: RconClient,
    server_dir: PathBuf,
    launch: Vec<String>,
    launcher: Arc<Launcher>,
}

impl RconServer {
    /// `launcher` outlives this server handle; every activation shares it.
    #[must_use]
    pub fn new(settings: &MinecraftSettings, launcher: Arc<Launcher>) -> Self {
        Self {
            rcon: RconClient::new(settings.rcon_address.clone(), settings.rcon_password.clone()),
            server_dir: settings.server_dir.clone(),
            launch: settings.launch.clone(),
            launcher,
        }
    }

    async fn tellraw(&self, target: &str, text: &str) -> Result<()> {
        let component = json!({ "text": text });
        self.rcon
            .command(&format!("tellraw {target} {component}"))
            .await
            .map(drop)
    }

    fn can_launch(&self) -> bool {
        self.launch.first().is_some_and(|program| !program.trim().is_empty())
    }

    async fn spawn_process(&self) -> Result<()> {
        self.launcher.start(&self.launch, &self.server_dir).await
    }

    /// Waits until the process we started exits, or, for a server we did not
    /// start, until its console stops answering.
    async fn wait_offline(&self) -> Result<()> {
        if self.launcher.is_running().await {
            if self.launcher.wait_exit(SHUTDOWN_TIMEOUT).await {
                return Ok(());
            }
            bail!("the server did not exit within {}s", SHUTDOWN_TIMEOUT.as_secs());
        }
        let polls = SHUTDOWN_TIMEOUT.as_secs() / SHUTDOWN_POLL.as_secs();
        for _ in 0..polls {
            if self.rcon.command("list").await.is_err() {
                return Ok(());
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        bail!("the server console is still answering after shutdown")
    }
}

#[async_trait]
impl GameServer for RconServer {
    async fn say(&self, text: &str) -> Result<()> {
        self.tellraw("@a", text).await
    }

    async fn tell(&self, player: &str, text: &str) -> Result<()> {
        self.tellraw(player, text).await
    }

    async fn execute(&self, command: &str) -> Result<()> {
        self.rcon.command(command).await.map(drop)
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.rcon.command(command).await
    }

    async fn online_players(&self) -> Result<Vec<String>> {
        let output = self.rcon.command("list").await?;
        Ok(parse_player_list(&output))
    }

    async fn is_operator(&self, player: &str) -> bool {
        let path = self.server_dir.join("ops.json");
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<Vec<OpEntry>>(&raw),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Cannot read operator list");
                return false;
            }
        };
        match entries {
            Ok(entries) => entries
                .iter()
                .any(|op| op.name.eq_ignore_ascii_case(player) && op.level >= OPERATOR_LEVEL),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Malformed operator list");
                false
            }
        }
    }

    async fn start(&self) -> Result<()> {
        self.spawn_process().await
    }

    async fn stop(&self) -> Result<()> {
        self.rcon.command("stop").await?;
        info!("Server stop requested");
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        if !self.can_launch() {
            bail!("no launch command is configured for the server");
        }
        self.stop().await?;
        self.wait_offline().await?;
        self.spawn_process().await
    }
}

/// Player names from the output of `list`, e.g.
/// `There are 2 of a max of 20 players online: Steve, Alex`.
fn parse_player_list(output: &str) -> Vec<String> {
    let Some((_, names)) = output.split_once(':') else {
        return Vec::new();
    };
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> MinecraftSettings {
        MinecraftSettings {
            rcon_address: "127.0.0.1:1".to_owned(),
            server_dir: dir.to_path_buf(),
            ..MinecraftSettings::default()
        }
    }

    #[test]
    fn player_list_parsing() {
        assert_eq!(
            parse_player_list("There are 2 of a max of 20 players online: Steve, Alex"),
            vec!["Steve".to_owned(), "Alex".to_owned()]
        );
        assert!(parse_player_list("There are 0 of a max of 20 players online: ").is_empty());
        assert!(parse_player_list("garbage").is_empty());
    }

    #[tokio::test]
    async fn operator_needs_level_two() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ops.json"),
            r#"[{"uuid":"x","name":"Steve","level":4},{"uuid":"y","name":"Alex","level":1}]"#,
        )
        .unwrap();
        let server = RconServer::new(&settings(dir.path()), Arc::default());
        assert!(server.is_operator("steve").await);
        assert!(!server.is_operator("Alex").await);
        assert!(!server.is_operator("Herobrine").await);
    }

    #[tokio::test]
    async fn missing_or_broken_ops_file_means_no_operators() {
        let dir = tempfile::tempdir().unwrap();
        let server = RconServer::new(&settings(dir.path()), Arc::default());
        assert!(!server.is_operator("Steve").await);
        std::fs::write(dir.path().join("ops.json"), "{").unwrap();
        assert!(!server.is_operator("Steve").await);
    }

    #[tokio::test]
    async fn start_without_launch_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let server = RconServer::new(&settings(dir.path()), Arc::default());
        let err = server.start().await.unwrap_err();
        assert!(err.to_string().contains("launch command"));
        assert!(server.restart().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launcher_is_shared_between_activations() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(Launcher::new());
        let launching = MinecraftSettings {
            launch: vec!["sleep".to_owned(), "5".to_owned()],
            ..settings(dir.path())
        };
        let before_reload = RconServer::new(&launching, Arc::clone(&launcher));
        before_reload.start().await.unwrap();
        drop(before_reload);

        let after_reload = RconServer::new(&launching, Arc::clone(&launcher));
        let err = after_reload.start().await.unwrap_err();
        assert!(err.to_string().contains("already running"));
        assert!(launcher.is_running().await);
    }
}
