//! Remote command handlers and the table that registers them.
//!
//! Registration order matters: the dispatcher takes the first structural
//! match, so every narrow pattern sits above the catch-all sharing its prefix.

use std::sync::Arc;

use anyhow::Result;
use bridge_core::{ArgType, BridgeContext, CommandDispatcher, ReplySink, ServerAction};
use tracing::warn;

pub mod admin;
pub mod bind;
pub mod game;
pub mod help;
pub mod whitelist;

const S: ArgType = ArgType::String;
const I: ArgType = ArgType::Integer;

pub(crate) const CONSOLE_UNAVAILABLE: &str = "The server console (RCON) is not available. Enable it and try again.";

/// Builds the full command table.
///
/// # Errors
///
/// Fails only if one of the built-in patterns does not compile.
pub fn build_dispatcher() -> Result<CommandDispatcher> {
    let mut d = CommandDispatcher::new();

    d.register_pattern(r"/mc (.*)", &[S], Arc::new(game::Mc))?;
    d.register_literal("/list", Arc::new(game::List));

    d.register_literal("/bind", Arc::new(help::StaticReply(help::BIND)));
    d.register_pattern(r"/bind unbind (\d*)", &[S], Arc::new(bind::Unbind))?;
    d.register_pattern(r"/bind query (TG|ID) (\w*)", &[S, S], Arc::new(bind::Query))?;
    d.register_pattern(r"/bind (\d*) (\w*)", &[S, S], Arc::new(bind::BindOther))?;
    d.register_pattern(r"/bind (\w*)", &[S], Arc::new(bind::BindSelf))?;

    d.register_literal("/whitelist", Arc::new(help::StaticReply(help::WHITELIST)));
    for sub in ["list", "reload", "on", "off"] {
        let command = format!("whitelist {sub}");
        d.register_literal(&format!("/{command}"), Arc::new(game::ConsoleCommand(command)));
    }
    d.register_pattern(r"/whitelist add (\w*)", &[S], Arc::new(whitelist::Add))?;
    d.register_pattern(r"/whitelist remove (\w*)", &[S], Arc::new(whitelist::Remove))?;

    d.register_pattern(r"/command (.*)", &[S], Arc::new(game::Command))?;
    d.register_literal("/help", Arc::new(help::Help));
    d.register_literal("/ping", Arc::new(help::Ping));

    d.register_literal("/start", Arc::new(game::Lifecycle(ServerAction::Start)));
    d.register_literal("/stop", Arc::new(game::Lifecycle(ServerAction::Stop)));
    d.register_literal("/restart", Arc::new(game::Lifecycle(ServerAction::Restart)));

    d.register_literal("/info", Arc::new(admin::Info));
    d.register_literal("/reload", Arc::new(admin::Reload));

    d.register_pattern(r"/ban (\d*)", &[I], Arc::new(game::Ban::Ban))?;
    d.register_pattern(r"/pardon (\d*)", &[I], Arc::new(game::Ban::Pardon))?;
    d.register_pattern(r"/bot-ban (\d*)", &[I], Arc::new(admin::BotBan))?;
    d.register_pattern(r"/bot-pardon (\d*)", &[I], Arc::new(admin::BotPardon))?;

    d.register_literal("/save", Arc::new(admin::Save));
    Ok(d)
}

/// Runs a console command and replies with its output. Empty output sends nothing.
pub(crate) async fn run_console(ctx: &BridgeContext, reply: &ReplySink, command: &str) -> Result<()> {
    match ctx.game.query(command).await {
        Ok(output) if output.trim().is_empty() => Ok(()),
        Ok(output) => ctx.gateway.reply(reply, output.trim_end()).await,
        Err(e) => {
            warn!(error = %e, command, "Console command failed");
            ctx.gateway.reply(reply, CONSOLE_UNAVAILABLE).await
        }
    }
}

pub(crate) async fn whitelist_add(ctx: &BridgeContext, reply: &ReplySink, player: &str) -> Result<()> {
    if let Err(e) = ctx.game.execute(&format!("whitelist add {player}")).await {
        warn!(error = %e, player, "Whitelist add failed");
        return ctx.gateway.reply(reply, CONSOLE_UNAVAILABLE).await;
    }
    ctx.gateway
        .reply(reply, format!("Added \"{player}\" to the server whitelist."))
        .await
}

pub(crate) async fn whitelist_remove(ctx: &BridgeContext, reply: &ReplySink, player: &str) -> Result<()> {
    if let Err(e) = ctx.game.execute(&format!("whitelist remove {player}")).await {
        warn!(error = %e, player, "Whitelist remove failed");
        return ctx.gateway.reply(reply, CONSOLE_UNAVAILABLE).await;
    }
    ctx.gateway
        .reply(reply, format!("Removed \"{player}\" from the server whitelist."))
        .await
}

#[cfg(test)]
pub(crate) mod test_support {
    use bridge_core::{CallerPrivilege, ChatScope, ReplySink, testing::{TestBed, event}};

    use super::build_dispatcher;

    pub const ADMIN: i64 = 1;
    pub const USER: i64 = 12345;
    pub const GROUP: i64 = -100;

    /// Dispatches `text` as `sender` in `scope`, the way the router would.
    pub async fn send_in(bed: &TestBed, sender: i64, scope: ChatScope, text: &str) -> bool {
        let chat = if scope == ChatScope::Private { sender } else { GROUP };
        let ev = event(chat, sender, scope, text);
        let sink = ReplySink::for_event(&ev).unwrap();
        let privilege = CallerPrivilege::from_admin(bed.ctx.config.is_admin(sender));
        build_dispatcher()
            .unwrap()
            .dispatch(&bed.ctx, &ev, &sink, text, privilege)
            .await
            .unwrap()
    }

    pub async fn send(bed: &TestBed, sender: i64, text: &str) -> bool {
        send_in(bed, sender, ChatScope::Group, text).await
    }
}
