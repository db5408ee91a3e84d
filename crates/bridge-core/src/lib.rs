pub mod config;
pub mod dispatcher;
pub mod event;
pub mod forward;
pub mod game;
pub mod gateway;
pub mod host;
pub mod profile;
pub mod router;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use core::fmt;
use std::{path::PathBuf, sync::Arc};

use time::OffsetDateTime;

pub use config::BridgeConfig;
pub use dispatcher::{Arg, ArgType, CommandArgs, CommandDispatcher, CommandHandler, Matcher};
pub use event::{
    CallerPrivilege, ChatRef, ChatScope, GameEvent, InboundEvent, InboundHandler, Sender,
};
pub use forward::GameForwarder;
pub use game::GameServer;
pub use gateway::{
    EntityKind, LocalSource, Outbound, OutboundGateway, OutgoingMessage, ReplySink, TextEntity,
    utf16_len,
};
pub use host::{HostHandle, HostRequest, ServerAction, run_server_action};
pub use profile::{ProfileError, ProfileLookup};
pub use router::EventRouter;
pub use store::{BanList, BindOutcome, Bindings};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a handler may touch, built once per activation.
#[derive(Clone)]
pub struct BridgeContext {
    pub config: Arc<BridgeConfig>,
    pub config_path: Arc<PathBuf>,
    pub bindings: Arc<Bindings>,
    pub bans: Arc<BanList>,
    pub game: Arc<dyn GameServer>,
    pub gateway: OutboundGateway,
    pub profiles: Arc<dyn ProfileLookup>,
    pub host: HostHandle,
    pub started_at: OffsetDateTime,
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("config_path", &self.config_path)
            .field("gateway", &self.gateway)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl BridgeContext {
    /// Player label for a remote user in game chat: green when bound, red with the
    /// remote identity when not.
    pub async fn game_label(&self, sender: &Sender) -> String {
        match self.bindings.player_for(&sender.id.to_string()).await {
            Some(player) => format!("§a<{player}>§7"),
            None => format!("§4<{} ({})>§7", sender.display_name, sender.id),
        }
    }
}

#[must_use]
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
