use core::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    BridgeContext, CallerPrivilege, ChatScope, CommandDispatcher, InboundEvent, InboundHandler,
    ReplySink, truncate,
};

/// Gates and classifies inbound events before they reach the dispatcher.
pub struct EventRouter {
    ctx: BridgeContext,
    dispatcher: Arc<CommandDispatcher>,
    username: OnceLock<String>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("dispatcher", &self.dispatcher)
            .field("username", &self.username.get())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    #[must_use]
    pub fn new(ctx: BridgeContext, dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            ctx,
            dispatcher,
            username: OnceLock::new(),
        }
    }

    pub async fn route(&self, event: &InboundEvent) {
        let (Some(chat), Some(sender)) = (&event.chat, &event.sender) else {
            debug!("Dropping event without chat or sender");
            return;
        };
        let Some(text) = event.text.as_deref() else {
            return;
        };
        let config = &self.ctx.config;
        let is_admin = config.is_admin(sender.id);

        let accepted = match chat.scope {
            ChatScope::Private => is_admin,
            ChatScope::Group => is_admin || chat.id == config.group,
            ChatScope::Other => false,
        };
        if !accepted {
            debug!(chat_id = chat.id, sender = sender.id, scope = ?chat.scope, "Dropping event outside scope");
            return;
        }

        let is_command = text.starts_with(config.command_prefix.as_str());

        // Any accepted group chat is forwarded, including admins posting elsewhere.
        if !is_command && config.forwardings.tg_to_mc && chat.scope == ChatScope::Group {
            let label = self.ctx.game_label(sender).await;
            if let Err(e) = self.ctx.game.say(&format!("§7[TG] {label}: {text}")).await {
                warn!(error = %e, "Failed to forward chat to game");
            }
        }

        // No acknowledgement either way; a reply would confirm the ban.
        if self.ctx.bans.contains(sender.id).await {
            debug!(sender = sender.id, "Ignoring banned user");
            return;
        }

        if !is_command {
            return;
        }

        let privilege = CallerPrivilege::from_admin(is_admin);
        let text = self.strip_own_mention(text);
        debug!(sender = sender.id, ?privilege, text = %truncate(&text, 200), "Handling command");

        let Some(sink) = ReplySink::for_event(event) else {
            return;
        };
        if let Err(e) = self
            .dispatcher
            .dispatch(&self.ctx, event, &sink, &text, privilege)
            .await
        {
            warn!(error = %e, sender = sender.id, "Command handler failed");
        }
    }

    /// `/cmd@ThisBot args` → `/cmd args`. Mentions of other bots are left alone.
    fn strip_own_mention(&self, text: &str) -> String {
        let Some(own) = self.username.get() else {
            return text.to_owned();
        };
        let (head, rest) = text.split_once(' ').map_or((text, None), |(h, r)| (h, Some(r)));
        match head.split_once('@') {
            Some((cmd, target)) if target.eq_ignore_ascii_case(own) => match rest {
                Some(rest) => format!("{cmd} {rest}"),
                None => cmd.to_owned(),
            },
            _ => text.to_owned(),
        }
    }
}

#[async_trait]
impl InboundHandler for EventRouter {
    async fn on_event(&self, event: InboundEvent) {
        self.route(&event).await;
    }

    async fn on_connected(&self, username: &str) {
        let _ = self.username.set(username.to_owned());
    }
}
