use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Remote identifiers with admin privilege. Numbers or numeric strings.
    #[serde(deserialize_with = "deserialize_ids")]
    pub admins: Vec<i64>,
    /// The single bound group/channel.
    pub group: i64,
    pub forwardings: Forwardings,
    pub telegram: TelegramSettings,
    pub whitelist: WhitelistSettings,
    pub minecraft: MinecraftSettings,
    pub command_prefix: String,
    /// In-game chat command that forwards the rest of the line to the group.
    pub game_command: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            group: 0,
            forwardings: Forwardings::default(),
            telegram: TelegramSettings::default(),
            whitelist: WhitelistSettings::default(),
            minecraft: MinecraftSettings::default(),
            command_prefix: "/".to_owned(),
            game_command: "!!tg".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct Forwardings {
    pub tg_to_mc: bool,
    pub mc_to_tg: bool,
}

impl Default for Forwardings {
    fn default() -> Self {
        Self {
            tg_to_mc: true,
            mc_to_tg: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    /// Bot API base URL; the token path segment is appended.
    pub api: Option<String>,
    pub poll_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: None,
            api: None,
            poll_timeout_secs: 30,
            connect_timeout_secs: 60,
        }
    }
}

impl TelegramSettings {
    #[must_use]
    pub fn api_url(&self) -> &str {
        self.api
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_API_URL)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WhitelistSettings {
    pub add_when_bind: bool,
    pub verify_player: bool,
}

impl Default for WhitelistSettings {
    fn default() -> Self {
        Self {
            add_when_bind: true,
            verify_player: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MinecraftSettings {
    pub rcon_address: String,
    pub rcon_password: String,
    pub server_dir: PathBuf,
    /// Defaults to `<server_dir>/logs/latest.log`.
    pub log_file: Option<PathBuf>,
    /// argv used by `/start` and `/restart`. Empty disables them.
    pub launch: Vec<String>,
}

impl Default for MinecraftSettings {
    fn default() -> Self {
        Self {
            rcon_address: "127.0.0.1:25575".to_owned(),
            rcon_password: String::new(),
            server_dir: PathBuf::from("./server"),
            log_file: None,
            launch: Vec::new(),
        }
    }
}

impl MinecraftSettings {
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.server_dir.join("logs").join("latest.log"))
    }
}

impl BridgeConfig {
    /// Reads the YAML config at `path`, writing a default one first if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, parsed or created.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(file = %path.display(), "Config file not found; writing defaults");
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&yaml).context("parsing YAML config")?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self).context("serializing config")?;
        fs::write(path, yaml).with_context(|| format!("writing config file at {}", path.display()))
    }

    #[must_use]
    pub fn is_admin(&self, id: i64) -> bool {
        self.admins.contains(&id)
    }
}

fn deserialize_ids<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(i64),
        Text(String),
    }

    Vec::<Id>::deserialize(deserializer)?
        .into_iter()
        .map(|id| match id {
            Id::Num(n) => Ok(n),
            Id::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid admin id {s:?}"))),
        })
        .collect()
}
