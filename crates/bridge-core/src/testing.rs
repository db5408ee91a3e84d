//! In-memory doubles for the transport, the game server and profile lookups.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::{
    BanList, Bindings, BridgeConfig, BridgeContext, ChatRef, ChatScope, GameServer, HostHandle,
    HostRequest, InboundEvent, Outbound, OutboundGateway, OutgoingMessage, ProfileError,
    ProfileLookup, Sender,
    store::{BAN_LIST_FILE, BINDINGS_FILE},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing_prefix: Mutex<Option<String>>,
}

impl RecordingOutbound {
    /// Makes every later send whose text starts with `prefix` fail without being recorded.
    pub fn fail_texts_starting_with(&self, prefix: &str) {
        *lock(&self.failing_prefix) = Some(prefix.to_owned());
    }

    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        lock(&self.sent).clone()
    }

    /// Texts of every message so far, in send order.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|m| m.text.clone()).collect()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_message(&self, message: OutgoingMessage) -> Result<()> {
        if lock(&self.failing_prefix)
            .as_deref()
            .is_some_and(|prefix| message.text.starts_with(prefix))
        {
            bail!("send to chat {} failed", message.chat_id);
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeGame {
    said: Mutex<Vec<String>>,
    told: Mutex<Vec<(String, String)>>,
    executed: Mutex<Vec<String>>,
    lifecycle: Mutex<Vec<&'static str>>,
    players: Mutex<Vec<String>>,
    operators: Mutex<BTreeSet<String>>,
    responses: Mutex<HashMap<String, String>>,
    online: Mutex<bool>,
}

impl Default for FakeGame {
    fn default() -> Self {
        Self {
            said: Mutex::default(),
            told: Mutex::default(),
            executed: Mutex::default(),
            lifecycle: Mutex::default(),
            players: Mutex::default(),
            operators: Mutex::default(),
            responses: Mutex::default(),
            online: Mutex::new(true),
        }
    }
}

impl FakeGame {
    #[must_use]
    pub fn said(&self) -> Vec<String> {
        lock(&self.said).clone()
    }

    #[must_use]
    pub fn told(&self) -> Vec<(String, String)> {
        lock(&self.told).clone()
    }

    /// Console commands from both `execute` and `query`.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// `start`, `stop` and `restart` calls in order.
    #[must_use]
    pub fn lifecycle(&self) -> Vec<&'static str> {
        lock(&self.lifecycle).clone()
    }

    pub fn set_players(&self, players: &[&str]) {
        *lock(&self.players) = players.iter().map(|p| (*p).to_owned()).collect();
    }

    pub fn set_operator(&self, player: &str) {
        lock(&self.operators).insert(player.to_owned());
    }

    pub fn respond(&self, command: &str, output: &str) {
        lock(&self.responses).insert(command.to_owned(), output.to_owned());
    }

    /// While offline every console call fails.
    pub fn set_online(&self, online: bool) {
        *lock(&self.online) = online;
    }

    fn ensure_online(&self) -> Result<()> {
        if !*lock(&self.online) {
            bail!("game console unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl GameServer for FakeGame {
    async fn say(&self, text: &str) -> Result<()> {
        self.ensure_online()?;
        lock(&self.said).push(text.to_owned());
        Ok(())
    }

    async fn tell(&self, player: &str, text: &str) -> Result<()> {
        self.ensure_online()?;
        lock(&self.told).push((player.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn execute(&self, command: &str) -> Result<()> {
        self.ensure_online()?;
        lock(&self.executed).push(command.to_owned());
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.ensure_online()?;
        lock(&self.executed).push(command.to_owned());
        Ok(lock(&self.responses)
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    async fn online_players(&self) -> Result<Vec<String>> {
        self.ensure_online()?;
        Ok(lock(&self.players).clone())
    }

    async fn is_operator(&self, player: &str) -> bool {
        lock(&self.operators).contains(player)
    }

    async fn start(&self) -> Result<()> {
        lock(&self.lifecycle).push("start");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.ensure_online()?;
        lock(&self.lifecycle).push("stop");
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        lock(&self.lifecycle).push("restart");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileMode {
    Accept,
    Reject(String),
    Timeout,
}

#[derive(Debug)]
pub struct StaticProfiles {
    mode: Mutex<ProfileMode>,
    asked: Mutex<Vec<String>>,
}

impl Default for StaticProfiles {
    fn default() -> Self {
        Self {
            mode: Mutex::new(ProfileMode::Accept),
            asked: Mutex::default(),
        }
    }
}

impl StaticProfiles {
    pub fn set_mode(&self, mode: ProfileMode) {
        *lock(&self.mode) = mode;
    }

    #[must_use]
    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }
}

#[async_trait]
impl ProfileLookup for StaticProfiles {
    async fn verify(&self, player: &str) -> Result<(), ProfileError> {
        lock(&self.asked).push(player.to_owned());
        match lock(&self.mode).clone() {
            ProfileMode::Accept => Ok(()),
            ProfileMode::Reject(detail) => Err(ProfileError::Rejected(detail)),
            ProfileMode::Timeout => Err(ProfileError::Timeout),
        }
    }
}

/// A fully wired [`BridgeContext`] over fakes, with its data files in a scratch directory.
#[derive(Debug)]
pub struct TestBed {
    pub ctx: BridgeContext,
    pub game: Arc<FakeGame>,
    pub out: Arc<RecordingOutbound>,
    pub profiles: Arc<StaticProfiles>,
    pub host_rx: mpsc::UnboundedReceiver<HostRequest>,
    pub dir: TempDir,
}

impl TestBed {
    /// # Panics
    ///
    /// Panics when the scratch directory cannot be prepared.
    pub async fn new(admins: &[i64], group: i64) -> Self {
        Self::with_config(admins, group, |_| {}).await
    }

    /// # Panics
    ///
    /// Panics when the scratch directory cannot be prepared.
    pub async fn with_config(
        admins: &[i64],
        group: i64,
        tweak: impl FnOnce(&mut BridgeConfig),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = BridgeConfig {
            admins: admins.to_vec(),
            group,
            ..BridgeConfig::default()
        };
        tweak(&mut config);

        let game = Arc::new(FakeGame::default());
        let out = Arc::new(RecordingOutbound::default());
        let profiles = Arc::new(StaticProfiles::default());
        let (tx, host_rx) = mpsc::unbounded_channel();

        let ctx = BridgeContext {
            config: Arc::new(config),
            config_path: Arc::new(dir.path().join("config.yaml")),
            bindings: Arc::new(Bindings::load(dir.path().join(BINDINGS_FILE)).await.unwrap()),
            bans: Arc::new(BanList::load(dir.path().join(BAN_LIST_FILE)).await.unwrap()),
            game: Arc::clone(&game) as Arc<dyn GameServer>,
            gateway: OutboundGateway::new(
                Arc::clone(&out) as Arc<dyn Outbound>,
                Arc::clone(&game) as Arc<dyn GameServer>,
                group,
            ),
            profiles: Arc::clone(&profiles) as Arc<dyn ProfileLookup>,
            host: HostHandle::new(tx),
            started_at: OffsetDateTime::now_utc(),
        };
        Self {
            ctx,
            game,
            out,
            profiles,
            host_rx,
            dir,
        }
    }
}

/// A text message from `sender_id` in `chat_id`. The sender's display name is `User <id>`.
#[must_use]
pub fn event(chat_id: i64, sender_id: i64, scope: ChatScope, text: &str) -> InboundEvent {
    InboundEvent {
        chat: Some(ChatRef { id: chat_id, scope }),
        sender: Some(Sender {
            id: sender_id,
            display_name: format!("User {sender_id}"),
        }),
        message_id: 10,
        text: Some(text.to_owned()),
        date: OffsetDateTime::now_utc(),
    }
}
