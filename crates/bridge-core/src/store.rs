//! Persisted bridge state: the remote-id → player binding map and the bot ban list.
//!
//! Each lives in its own `{"data": ...}` JSON document that is read at activation
//! and rewritten in full after every mutation. A mutation is only visible once
//! the write has completed; a failed write rolls the in-memory change back.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const BINDINGS_FILE: &str = "bindings.json";
pub const BAN_LIST_FILE: &str = "ban_list.json";

#[derive(Debug, Serialize, Deserialize, Default)]
struct Document<T> {
    data: T,
}

async fn read_document<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!(file = %path.display(), "Data file missing; creating an empty one");
        let empty = T::default();
        write_document(path, &empty).await?;
        return Ok(empty);
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading data file at {}", path.display()))?;
    let doc: Document<T> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing data file at {}", path.display()))?;
    Ok(doc.data)
}

async fn write_document<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(&Document { data })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing data file at {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing data file at {}", path.display()))?;
    debug!(file = %path.display(), "Data file written");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// The identifier already had a binding; nothing changed.
    AlreadyBound(String),
}

/// Remote identifier → player name. Several identifiers may name the same player.
#[derive(Debug)]
pub struct Bindings {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
}

impl Bindings {
    /// # Errors
    ///
    /// Fails when the document exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = read_document(&path).await?;
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    pub async fn player_for(&self, id: &str) -> Option<String> {
        self.map.read().await.get(id).cloned()
    }

    /// Every identifier bound to `player`, in identifier order.
    pub async fn ids_for_player(&self, player: &str) -> Vec<String> {
        self.map
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.as_str() == player)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.map.read().await.clone()
    }

    /// Binds `id` unless it already has a binding. Check and write happen under one lock.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be written; the binding is not kept.
    pub async fn bind_new(&self, id: &str, player: &str) -> Result<BindOutcome> {
        let mut map = self.map.write().await;
        if let Some(existing) = map.get(id) {
            return Ok(BindOutcome::AlreadyBound(existing.clone()));
        }
        map.insert(id.to_owned(), player.to_owned());
        if let Err(e) = write_document(&self.path, &*map).await {
            map.remove(id);
            return Err(e);
        }
        Ok(BindOutcome::Bound)
    }

    /// Points `id` at `player`, replacing any binding in one write. Returns the
    /// player `id` was bound to before.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be written; the previous binding is restored.
    pub async fn rebind(&self, id: &str, player: &str) -> Result<Option<String>> {
        let mut map = self.map.write().await;
        let previous = map.insert(id.to_owned(), player.to_owned());
        if let Err(e) = write_document(&self.path, &*map).await {
            match &previous {
                Some(old) => map.insert(id.to_owned(), old.clone()),
                None => map.remove(id),
            };
            return Err(e);
        }
        Ok(previous)
    }

    /// Removes the binding for `id`, returning the player it named.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be written; the binding is restored.
    pub async fn unbind(&self, id: &str) -> Result<Option<String>> {
        let mut map = self.map.write().await;
        let Some(previous) = map.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = write_document(&self.path, &*map).await {
            map.insert(id.to_owned(), previous);
            return Err(e);
        }
        Ok(Some(previous))
    }

    /// # Errors
    ///
    /// Fails when the document cannot be written.
    pub async fn save(&self) -> Result<()> {
        let map = self.map.read().await;
        write_document(&self.path, &*map).await
    }
}

/// Remote identifiers denied all dispatcher access.
#[derive(Debug)]
pub struct BanList {
    path: PathBuf,
    ids: RwLock<BTreeSet<i64>>,
}

impl BanList {
    /// # Errors
    ///
    /// Fails when the document exists but cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = read_document(&path).await?;
        Ok(Self {
            path,
            ids: RwLock::new(ids),
        })
    }

    pub async fn contains(&self, id: i64) -> bool {
        self.ids.read().await.contains(&id)
    }

    /// Returns `false` when `id` was already banned.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be written; the ban is not kept.
    pub async fn ban(&self, id: i64) -> Result<bool> {
        let mut ids = self.ids.write().await;
        if !ids.insert(id) {
            return Ok(false);
        }
        if let Err(e) = write_document(&self.path, &*ids).await {
            ids.remove(&id);
            return Err(e);
        }
        Ok(true)
    }

    /// Returns `false` when `id` was not banned.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be written; the ban is restored.
    pub async fn pardon(&self, id: i64) -> Result<bool> {
        let mut ids = self.ids.write().await;
        if !ids.remove(&id) {
            return Ok(false);
        }
        if let Err(e) = write_document(&self.path, &*ids).await {
            ids.insert(id);
            return Err(e);
        }
        Ok(true)
    }

    /// # Errors
    ///
    /// Fails when the document cannot be written.
    pub async fn save(&self) -> Result<()> {
        let ids = self.ids.read().await;
        write_document(&self.path, &*ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_starts_empty_and_is_created() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(BINDINGS_FILE);
        let bindings = Bindings::load(&path).await.unwrap();
        assert!(bindings.snapshot().await.is_empty());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&raw).unwrap(),
            serde_json::json!({ "data": {} })
        );
    }

    #[tokio::test]
    async fn bindings_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(BINDINGS_FILE);
        let bindings = Bindings::load(&path).await.unwrap();
        bindings.bind_new("111", "Steve").await.unwrap();
        bindings.bind_new("222", "Alex").await.unwrap();
        let before = bindings.snapshot().await;

        let reloaded = Bindings::load(&path).await.unwrap();
        assert_eq!(reloaded.snapshot().await, before);
    }

    #[tokio::test]
    async fn second_bind_keeps_the_first() {
        let tmp = TempDir::new().unwrap();
        let bindings = Bindings::load(tmp.path().join(BINDINGS_FILE)).await.unwrap();
        assert_eq!(bindings.bind_new("111", "Steve").await.unwrap(), BindOutcome::Bound);
        assert_eq!(
            bindings.bind_new("111", "Herobrine").await.unwrap(),
            BindOutcome::AlreadyBound("Steve".into())
        );
        assert_eq!(bindings.player_for("111").await.as_deref(), Some("Steve"));
    }

    #[tokio::test]
    async fn duplicate_player_names_are_tolerated() {
        let tmp = TempDir::new().unwrap();
        let bindings = Bindings::load(tmp.path().join(BINDINGS_FILE)).await.unwrap();
        bindings.bind_new("111", "Steve").await.unwrap();
        bindings.bind_new("222", "Steve").await.unwrap();
        bindings.bind_new("333", "Alex").await.unwrap();
        assert_eq!(bindings.ids_for_player("Steve").await, vec!["111", "222"]);
        assert!(bindings.ids_for_player("Notch").await.is_empty());
    }

    #[tokio::test]
    async fn unbind_returns_previous_player() {
        let tmp = TempDir::new().unwrap();
        let bindings = Bindings::load(tmp.path().join(BINDINGS_FILE)).await.unwrap();
        bindings.bind_new("111", "Steve").await.unwrap();
        assert_eq!(bindings.unbind("111").await.unwrap().as_deref(), Some("Steve"));
        assert_eq!(bindings.unbind("111").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rebind_swaps_in_one_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(BINDINGS_FILE);
        let bindings = Bindings::load(&path).await.unwrap();
        assert_eq!(bindings.rebind("42", "Steve").await.unwrap(), None);
        assert_eq!(
            bindings.rebind("42", "Alex").await.unwrap().as_deref(),
            Some("Steve")
        );
        let reloaded = Bindings::load(&path).await.unwrap();
        assert_eq!(reloaded.player_for("42").await.as_deref(), Some("Alex"));
    }

    #[tokio::test]
    async fn ban_and_pardon_persist() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(BAN_LIST_FILE);
        let bans = BanList::load(&path).await.unwrap();
        assert!(bans.ban(12345).await.unwrap());
        assert!(!bans.ban(12345).await.unwrap());
        assert!(BanList::load(&path).await.unwrap().contains(12345).await);

        assert!(bans.pardon(12345).await.unwrap());
        assert!(!bans.pardon(12345).await.unwrap());
        assert!(!BanList::load(&path).await.unwrap().contains(12345).await);
    }

    #[tokio::test]
    async fn reads_existing_document_layout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(BAN_LIST_FILE);
        std::fs::write(&path, r#"{"data": [1, 2, 3]}"#).unwrap();
        let bans = BanList::load(&path).await.unwrap();
        assert!(bans.contains(2).await);
        assert!(!bans.contains(4).await);
    }
}
