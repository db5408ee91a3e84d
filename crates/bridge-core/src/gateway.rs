use core::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{GameServer, InboundEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Bold,
    Italic,
}

/// Rich-text span. Offsets and lengths are in UTF-16 code units, as the Bot API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl TextEntity {
    #[must_use]
    pub const fn bold(offset: usize, length: usize) -> Self {
        Self {
            kind: EntityKind::Bold,
            offset,
            length,
        }
    }

    #[must_use]
    pub const fn italic(offset: usize, length: usize) -> Self {
        Self {
            kind: EntityKind::Italic,
            offset,
            length,
        }
    }
}

#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i32>,
    pub entities: Vec<TextEntity>,
}

/// Sending half of the remote transport.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_message(&self, message: OutgoingMessage) -> Result<()>;
}

/// Tracing target of replies to console-issued commands, e.g. `RUST_LOG=console=info`.
pub const CONSOLE_TARGET: &str = "console";

/// Where a command was issued on the game host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    Console,
    Player(String),
}

/// Where replies to a command go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySink {
    OriginatingMessage { chat_id: i64, message_id: i32 },
    LocalSource(LocalSource),
}

impl ReplySink {
    #[must_use]
    pub fn for_event(event: &InboundEvent) -> Option<Self> {
        event.chat.as_ref().map(|chat| Self::OriginatingMessage {
            chat_id: chat.id,
            message_id: event.message_id,
        })
    }
}

/// One send abstraction for event replies and group broadcasts.
#[derive(Clone)]
pub struct OutboundGateway {
    transport: Arc<dyn Outbound>,
    game: Arc<dyn GameServer>,
    group: i64,
}

impl fmt::Debug for OutboundGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundGateway")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl OutboundGateway {
    #[must_use]
    pub fn new(transport: Arc<dyn Outbound>, game: Arc<dyn GameServer>, group: i64) -> Self {
        Self {
            transport,
            game,
            group,
        }
    }

    #[must_use]
    pub const fn group(&self) -> i64 {
        self.group
    }

    /// Replies into whatever issued the command, threaded when it was a remote message.
    ///
    /// # Errors
    ///
    /// Returns the transport or game-server error.
    pub async fn reply(&self, sink: &ReplySink, text: impl Into<String> + Send) -> Result<()> {
        let text = text.into();
        match sink {
            ReplySink::OriginatingMessage {
                chat_id,
                message_id,
            } => {
                debug!(chat_id, reply_to = message_id, text = %text, "Sending reply");
                self.transport
                    .send_message(OutgoingMessage {
                        chat_id: *chat_id,
                        text,
                        reply_to: Some(*message_id),
                        entities: Vec::new(),
                    })
                    .await
            }
            ReplySink::LocalSource(LocalSource::Console) => {
                info!(target: CONSOLE_TARGET, "{text}");
                Ok(())
            }
            ReplySink::LocalSource(LocalSource::Player(player)) => {
                debug!(player = %player, text = %text, "Replying to player");
                self.game.tell(player, &text).await
            }
        }
    }

    /// Sends to the bound group, independent of any triggering event.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn broadcast(
        &self,
        text: impl Into<String> + Send,
        entities: Vec<TextEntity>,
    ) -> Result<()> {
        let text = text.into();
        if self.group == 0 {
            warn!(text = %text, "No group bound; dropping broadcast");
            return Ok(());
        }
        debug!(chat_id = self.group, text = %text, entities = ?entities, "Sending broadcast");
        self.transport
            .send_message(OutgoingMessage {
                chat_id: self.group,
                text,
                reply_to: None,
                entities,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGame, RecordingOutbound};

    fn gateway(group: i64) -> (OutboundGateway, Arc<RecordingOutbound>, Arc<FakeGame>) {
        let out = Arc::new(RecordingOutbound::default());
        let game = Arc::new(FakeGame::default());
        let gw = OutboundGateway::new(
            Arc::clone(&out) as Arc<dyn Outbound>,
            Arc::clone(&game) as Arc<dyn GameServer>,
            group,
        );
        (gw, out, game)
    }

    #[tokio::test]
    async fn console_reply_goes_to_the_log_only() {
        let (gw, out, game) = gateway(-100);
        gw.reply(&ReplySink::LocalSource(LocalSource::Console), "Console is not bound")
            .await
            .unwrap();
        assert!(out.sent().is_empty());
        assert!(game.told().is_empty());
    }

    #[tokio::test]
    async fn reply_threads_to_original_message() {
        let (gw, out, _) = gateway(-100);
        let sink = ReplySink::OriginatingMessage {
            chat_id: 42,
            message_id: 7,
        };
        gw.reply(&sink, "pong").await.unwrap();
        let sent = out.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, 42);
        assert_eq!(sent[0].reply_to, Some(7));
        assert_eq!(sent[0].text, "pong");
    }

    #[tokio::test]
    async fn player_reply_goes_through_the_game() {
        let (gw, out, game) = gateway(-100);
        let sink = ReplySink::LocalSource(LocalSource::Player("Steve".into()));
        gw.reply(&sink, "bind first").await.unwrap();
        assert!(out.sent().is_empty());
        assert_eq!(game.told(), vec![("Steve".to_owned(), "bind first".to_owned())]);
    }

    #[tokio::test]
    async fn broadcast_targets_the_group() {
        let (gw, out, _) = gateway(-100);
        gw.broadcast("Steve:\nhi", vec![TextEntity::bold(0, 6)])
            .await
            .unwrap();
        let sent = out.sent();
        assert_eq!(sent[0].chat_id, -100);
        assert_eq!(sent[0].reply_to, None);
        assert_eq!(sent[0].entities, vec![TextEntity::bold(0, 6)]);
    }

    #[tokio::test]
    async fn broadcast_without_group_is_dropped() {
        let (gw, out, _) = gateway(0);
        gw.broadcast("nobody hears this", Vec::new()).await.unwrap();
        assert!(out.sent().is_empty());
    }

    #[test]
    fn utf16_counts_surrogate_pairs() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("史蒂夫"), 3);
        assert_eq!(utf16_len("🏓"), 2);
    }
}
