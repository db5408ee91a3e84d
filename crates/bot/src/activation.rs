//! One activation of the bridge: everything built from the config on disk,
//! torn down again on exit or `/reload`.

use core::time::Duration;
use std::{
    io::IsTerminal as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, Result, anyhow};
use bridge_core::{
    BanList, Bindings, BridgeConfig, BridgeContext, EventRouter, GameEvent, GameForwarder,
    GameServer, HostHandle, Outbound, OutboundGateway, ProfileLookup,
    profile::MojangProfiles,
    store::{BAN_LIST_FILE, BINDINGS_FILE},
};
use minecraft_link::{Launcher, LogParser, RconServer, follow_log};
use telegram_link::{BotConnection, TelegramApi};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PROFILE_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const GAME_EVENT_BUFFER: usize = 64;

/// Inputs that survive a reload.
#[derive(Debug)]
pub struct Settings {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub token: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    /// Token typed at the prompt on first activation; reused on reload.
    pub prompted_token: Option<String>,
}

impl Settings {
    fn token(&mut self, config: &BridgeConfig) -> Result<String> {
        let configured = self
            .token
            .as_deref()
            .or(config.telegram.token.as_deref())
            .or(self.prompted_token.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = configured {
            return Ok(token.to_owned());
        }
        if !std::io::stdin().is_terminal() {
            return Err(anyhow!(
                "No bot token provided. Set telegram.token in {}, pass --token or set TGCHAT_TOKEN",
                self.config_path.display()
            ));
        }
        warn!("No bot token configured. Prompting...");
        #[cfg(feature = "rpassword")]
        {
            let token = rpassword::prompt_password("Telegram bot token:")
                .map_err(|e| anyhow!("Failed to read token: {e}"))?;
            let token = token.trim().to_owned();
            self.prompted_token = Some(token.clone());
            Ok(token)
        }
        #[cfg(not(feature = "rpassword"))]
        {
            Err(anyhow!(
                "rpassword feature is not enabled. Cannot prompt for the token."
            ))
        }
    }
}

pub struct Bridge {
    pub ctx: BridgeContext,
    connection: BotConnection,
    pub forwarder: GameForwarder,
    pub game_events: mpsc::Receiver<GameEvent>,
    follower: CancellationToken,
}

impl core::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bridge")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Loads config and data, connects the bot and starts following the
    /// server log. Blocks until the bot is connected or the timeout passes.
    ///
    /// # Errors
    ///
    /// Any load or startup failure; nothing is left running in that case.
    pub async fn activate(
        settings: &mut Settings,
        host: HostHandle,
        launcher: Arc<Launcher>,
    ) -> Result<Self> {
        let config = BridgeConfig::load(&settings.config_path)?;
        let token = settings.token(&config)?;
        let connect_timeout = Duration::from_secs(
            settings
                .connect_timeout_secs
                .unwrap_or(config.telegram.connect_timeout_secs),
        );

        tokio::fs::create_dir_all(&settings.data_dir)
            .await
            .with_context(|| format!("creating data directory at {}", settings.data_dir.display()))?;
        let bindings = Arc::new(Bindings::load(settings.data_dir.join(BINDINGS_FILE)).await?);
        let bans = Arc::new(BanList::load(settings.data_dir.join(BAN_LIST_FILE)).await?);

        let game: Arc<dyn GameServer> = Arc::new(RconServer::new(&config.minecraft, launcher));
        let api = Arc::new(
            TelegramApi::new(
                config.telegram.api_url(),
                &token,
                config.telegram.poll_timeout_secs,
            )
            .context("building the Bot API client")?,
        );
        let transport: Arc<dyn Outbound> = Arc::<TelegramApi>::clone(&api);
        let gateway = OutboundGateway::new(transport, Arc::clone(&game), config.group);
        let profiles: Arc<dyn ProfileLookup> =
            Arc::new(MojangProfiles::new(PROFILE_TIMEOUT).context("building the profile client")?);

        let log_path = config.minecraft.log_path();
        let ctx = BridgeContext {
            config: Arc::new(config),
            config_path: Arc::new(settings.config_path.clone()),
            bindings,
            bans,
            game,
            gateway,
            profiles,
            host,
            started_at: OffsetDateTime::now_utc(),
        };
        let dispatcher = Arc::new(bridge_commands::build_dispatcher()?);
        let router = Arc::new(EventRouter::new(ctx.clone(), dispatcher));

        let mut connection = BotConnection::new(api, router);
        tokio::task::block_in_place(|| connection.start(true, connect_timeout))
            .context("starting the Telegram bot")?;

        let (tx, game_events) = mpsc::channel(GAME_EVENT_BUFFER);
        let follower = CancellationToken::new();
        spawn_follower(log_path, tx, follower.clone())?;

        info!(group = ctx.config.group, "Bridge activated");
        Ok(Self {
            ctx: ctx.clone(),
            connection,
            forwarder: GameForwarder::new(ctx),
            game_events,
            follower,
        })
    }

    pub fn deactivate(&mut self) {
        self.follower.cancel();
        let outcome = tokio::task::block_in_place(|| self.connection.stop(STOP_TIMEOUT));
        info!(?outcome, "Bridge deactivated");
    }
}

fn spawn_follower(
    path: PathBuf,
    tx: mpsc::Sender<GameEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let parser = LogParser::new()?;
    tokio::spawn(async move { follow_log(Path::new(&path), parser, tx, cancel).await });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> Settings {
        Settings {
            config_path: dir.join("config.yaml"),
            data_dir: dir.to_path_buf(),
            token: None,
            connect_timeout_secs: Some(1),
            prompted_token: None,
        }
    }

    #[test]
    fn cli_token_wins_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.token = Some(" 123:abc ".to_owned());
        let mut config = BridgeConfig::default();
        config.telegram.token = Some("999:zzz".to_owned());
        assert_eq!(settings.token(&config).unwrap(), "123:abc");

        settings.token = None;
        assert_eq!(settings.token(&config).unwrap(), "999:zzz");
    }

    #[test]
    fn prompted_token_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.prompted_token = Some("42:prompted".to_owned());
        assert_eq!(
            settings.token(&BridgeConfig::default()).unwrap(),
            "42:prompted"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_api_fails_activation() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let api = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = BridgeConfig::default();
        config.telegram.token = Some("1:token".to_owned());
        config.telegram.api = Some(api);
        config.save(&dir.path().join("config.yaml")).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = Bridge::activate(
            &mut settings(dir.path()),
            HostHandle::new(tx),
            Arc::default(),
        )
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("starting the Telegram bot"));
    }
}
