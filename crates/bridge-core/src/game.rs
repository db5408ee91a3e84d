use anyhow::Result;
use async_trait::async_trait;

/// Game-server mutation and query surface used by command handlers.
#[async_trait]
pub trait GameServer: Send + Sync {
    /// Broadcast a chat line to every player. Legacy `§` formatting codes are kept.
    async fn say(&self, text: &str) -> Result<()>;

    /// Send a private line to one player.
    async fn tell(&self, player: &str, text: &str) -> Result<()>;

    /// Run a console command, discarding its output.
    async fn execute(&self, command: &str) -> Result<()>;

    /// Run a console command and return its output. Fails when the console is unreachable.
    async fn query(&self, command: &str) -> Result<String>;

    async fn online_players(&self) -> Result<Vec<String>>;

    /// Whether `player` holds operator level 2 or above.
    async fn is_operator(&self, player: &str) -> bool;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;
}
