//! Game side of the bridge: RCON console access, the server process and its log.

pub mod launcher;
pub mod log_tail;
pub mod rcon;
pub mod server;

pub use launcher::Launcher;
pub use log_tail::{LogParser, follow_log};
pub use rcon::RconClient;
pub use server::RconServer;
