use anyhow::Result;
use tracing::{debug, warn};

use crate::{BridgeContext, GameEvent, LocalSource, ReplySink, TextEntity, utf16_len};

/// Game → remote direction: chat lines, join/leave notices and the in-game forwarding command.
#[derive(Debug, Clone)]
pub struct GameForwarder {
    ctx: BridgeContext,
}

impl GameForwarder {
    #[must_use]
    pub const fn new(ctx: BridgeContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns the gateway error when a broadcast fails.
    pub async fn on_game_event(&self, event: GameEvent) -> Result<()> {
        match event {
            GameEvent::Chat { player, content } => {
                if let Some(message) = self.command_body(&content) {
                    return self
                        .run_game_command(LocalSource::Player(player), message)
                        .await;
                }
                if !self.ctx.config.forwardings.mc_to_tg {
                    return Ok(());
                }
                let text = format!("{player}:\n{content}");
                let bold = TextEntity::bold(0, utf16_len(&player) + 1);
                self.ctx.gateway.broadcast(text, vec![bold]).await
            }
            GameEvent::Joined { player } => self.notice(&player, "joined the game.").await,
            GameEvent::Left { player } => self.notice(&player, "left the game.").await,
        }
    }

    /// A line typed on the host console. Only the game command is understood there.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when a broadcast fails.
    pub async fn on_console_line(&self, line: &str) -> Result<()> {
        let line = line.trim();
        match self.command_body(line) {
            Some(message) => self.run_game_command(LocalSource::Console, message).await,
            None => {
                if !line.is_empty() {
                    debug!(line, "Ignoring console input");
                }
                Ok(())
            }
        }
    }

    fn command_body<'a>(&self, text: &'a str) -> Option<&'a str> {
        let rest = text.strip_prefix(self.ctx.config.game_command.as_str())?;
        if rest.is_empty() {
            return Some("");
        }
        rest.starts_with(char::is_whitespace).then(|| rest.trim())
    }

    async fn run_game_command(&self, source: LocalSource, message: &str) -> Result<()> {
        let sink = ReplySink::LocalSource(source.clone());
        if message.is_empty() {
            let usage = format!("Usage: {} <message>", self.ctx.config.game_command);
            return self.ctx.gateway.reply(&sink, usage).await;
        }
        let name = match &source {
            LocalSource::Console => "Console".to_owned(),
            LocalSource::Player(player) => {
                let ids = self.ctx.bindings.ids_for_player(player).await;
                if ids.is_empty() {
                    return self
                        .ctx
                        .gateway
                        .reply(&sink, "Bind your account in the group first!")
                        .await;
                }
                let bound_admin = ids
                    .iter()
                    .filter_map(|id| id.parse::<i64>().ok())
                    .any(|id| self.ctx.config.is_admin(id));
                if !bound_admin && !self.ctx.game.is_operator(player).await {
                    warn!(player = %player, "Game command denied");
                    return self
                        .ctx
                        .gateway
                        .reply(&sink, "You don't have enough permission!")
                        .await;
                }
                player.clone()
            }
        };
        let text = format!("{name}:\n{message}");
        let bold = TextEntity::bold(0, utf16_len(&name) + 1);
        self.ctx.gateway.broadcast(text, vec![bold]).await
    }

    async fn notice(&self, player: &str, what: &str) -> Result<()> {
        let text = format!("{player} {what}");
        let entities = vec![
            TextEntity::italic(0, utf16_len(&text)),
            TextEntity::bold(0, utf16_len(player)),
        ];
        self.ctx.gateway.broadcast(text, entities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBed;

    const GROUP: i64 = -100;

    #[tokio::test]
    async fn chat_is_broadcast_with_bold_name() {
        let bed = TestBed::new(&[], GROUP).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Chat {
            player: "Steve".into(),
            content: "hello".into(),
        })
        .await
        .unwrap();
        let sent = bed.out.sent();
        assert_eq!(sent[0].chat_id, GROUP);
        assert_eq!(sent[0].text, "Steve:\nhello");
        assert_eq!(sent[0].entities, vec![TextEntity::bold(0, 6)]);
    }

    #[tokio::test]
    async fn chat_forwarding_can_be_disabled() {
        let bed = TestBed::with_config(&[], GROUP, |c| c.forwardings.mc_to_tg = false).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Chat {
            player: "Steve".into(),
            content: "hello".into(),
        })
        .await
        .unwrap();
        assert!(bed.out.sent().is_empty());
    }

    #[tokio::test]
    async fn join_notice_is_italic_with_bold_name() {
        let bed = TestBed::new(&[], GROUP).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Joined {
            player: "Alex".into(),
        })
        .await
        .unwrap();
        let sent = bed.out.sent();
        assert_eq!(sent[0].text, "Alex joined the game.");
        assert_eq!(
            sent[0].entities,
            vec![TextEntity::italic(0, 21), TextEntity::bold(0, 4)]
        );
    }

    #[tokio::test]
    async fn unbound_player_is_told_to_bind() {
        let bed = TestBed::new(&[], GROUP).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Chat {
            player: "Steve".into(),
            content: "!!tg hi group".into(),
        })
        .await
        .unwrap();
        assert!(bed.out.sent().is_empty());
        assert_eq!(bed.game.told()[0].1, "Bind your account in the group first!");
    }

    #[tokio::test]
    async fn bound_non_admin_without_op_is_denied() {
        let bed = TestBed::new(&[], GROUP).await;
        bed.ctx.bindings.bind_new("5", "Steve").await.unwrap();
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Chat {
            player: "Steve".into(),
            content: "!!tg hi group".into(),
        })
        .await
        .unwrap();
        assert!(bed.out.sent().is_empty());
        assert_eq!(bed.game.told()[0].1, "You don't have enough permission!");
    }

    #[tokio::test]
    async fn bound_admin_or_operator_may_forward() {
        let bed = TestBed::new(&[5], GROUP).await;
        bed.ctx.bindings.bind_new("5", "Steve").await.unwrap();
        bed.ctx.bindings.bind_new("6", "Alex").await.unwrap();
        bed.game.set_operator("Alex");
        let fwd = GameForwarder::new(bed.ctx.clone());
        for player in ["Steve", "Alex"] {
            fwd.on_game_event(GameEvent::Chat {
                player: player.into(),
                content: "!!tg hi group".into(),
            })
            .await
            .unwrap();
        }
        let sent = bed.out.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "Steve:\nhi group");
        assert_eq!(sent[1].text, "Alex:\nhi group");
    }

    #[tokio::test]
    async fn console_always_forwards() {
        let bed = TestBed::new(&[], GROUP).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_console_line("!!tg server restarting soon\n").await.unwrap();
        fwd.on_console_line("list").await.unwrap();
        let sent = bed.out.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Console:\nserver restarting soon");
        assert_eq!(sent[0].entities, vec![TextEntity::bold(0, 8)]);
    }

    #[tokio::test]
    async fn lookalike_prefix_is_plain_chat() {
        let bed = TestBed::new(&[], GROUP).await;
        let fwd = GameForwarder::new(bed.ctx.clone());
        fwd.on_game_event(GameEvent::Chat {
            player: "Steve".into(),
            content: "!!tgx nope".into(),
        })
        .await
        .unwrap();
        assert_eq!(bed.out.sent()[0].text, "Steve:\n!!tgx nope");
    }
}
