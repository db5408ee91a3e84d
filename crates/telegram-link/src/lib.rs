//! Telegram side of the bridge: the Bot API client and the polling lifecycle.

pub mod api;
pub mod lifecycle;

pub use api::{TelegramApi, TransportError, Update};
pub use lifecycle::{BotConnection, ConnectionState, LifecycleError, PollingClient, StopOutcome};
