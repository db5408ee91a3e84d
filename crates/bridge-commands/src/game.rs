use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    BridgeContext, CallerPrivilege, CommandArgs, CommandHandler, HostRequest, InboundEvent,
    ReplySink, ServerAction,
};
use tracing::{info, warn};

use crate::{CONSOLE_UNAVAILABLE, run_console};

/// `/mc <text>`: a chat line into the game.
#[derive(Debug)]
pub struct Mc;

#[async_trait]
impl CommandHandler for Mc {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        let (Some(sender), Some(text)) = (&event.sender, args.str(0)) else {
            return Ok(());
        };
        let bound = ctx.bindings.player_for(&sender.id.to_string()).await;
        let line = match bound {
            Some(player) if privilege.is_admin() => format!("§2[TG] §a<{player}>§7 {text}"),
            _ => format!("§7[TG] {} {text}", ctx.game_label(sender).await),
        };
        if let Err(e) = ctx.game.say(&line).await {
            warn!(error = %e, "Failed to send chat line to the game");
            return ctx.gateway.reply(reply, CONSOLE_UNAVAILABLE).await;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct List;

#[async_trait]
impl CommandHandler for List {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        _privilege: CallerPrivilege,
    ) -> Result<()> {
        let players = match ctx.game.online_players().await {
            Ok(players) => players,
            Err(e) => {
                warn!(error = %e, "Failed to list online players");
                return ctx.gateway.reply(reply, CONSOLE_UNAVAILABLE).await;
            }
        };
        let mut text = format!("There are {} players online.", players.len());
        if !players.is_empty() {
            text.push_str("\n=== Player list ===");
            for player in &players {
                text.push('\n');
                text.push_str(player);
            }
        }
        ctx.gateway.reply(reply, text).await
    }
}

/// `/command <text>` (admin): raw console passthrough.
#[derive(Debug)]
pub struct Command;

#[async_trait]
impl CommandHandler for Command {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        if !privilege.is_admin() {
            return Ok(());
        }
        let Some(command) = args.str(0) else {
            return Ok(());
        };
        info!(command, "Running console command from chat");
        run_console(ctx, reply, command).await
    }
}

/// A fixed console command (admin), e.g. `whitelist list`.
#[derive(Debug)]
pub struct ConsoleCommand(pub String);

#[async_trait]
impl CommandHandler for ConsoleCommand {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        if !privilege.is_admin() {
            return Ok(());
        }
        run_console(ctx, reply, &self.0).await
    }
}

/// `/start`, `/stop` and `/restart` (admin). Handed to the host loop: a
/// restart waits for the server to go down and must not hold up polling.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle(pub ServerAction);

#[async_trait]
impl CommandHandler for Lifecycle {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        if !privilege.is_admin() {
            return Ok(());
        }
        info!(action = ?self.0, "Server lifecycle command queued");
        ctx.host.request(HostRequest::Server {
            action: self.0,
            reply: reply.clone(),
        });
        Ok(())
    }
}

/// `/ban <id>` and `/pardon <id>` (admin): act on the player bound to a remote account.
#[derive(Debug, Clone, Copy)]
pub enum Ban {
    Ban,
    Pardon,
}

#[async_trait]
impl CommandHandler for Ban {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        if !privilege.is_admin() {
            return Ok(());
        }
        let Some(id) = args.int(0) else {
            return Ok(());
        };
        let Some(player) = ctx.bindings.player_for(&id.to_string()).await else {
            return ctx
                .gateway
                .reply(reply, format!("Account {id} is not bound to any player."))
                .await;
        };
        let command = match self {
            Self::Ban => format!("ban {player}"),
            Self::Pardon => format!("pardon {player}"),
        };
        run_console(ctx, reply, &command).await
    }
}
