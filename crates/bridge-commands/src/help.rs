use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    BridgeContext, CallerPrivilege, CommandArgs, CommandHandler, InboundEvent, ReplySink, VERSION,
};
use time::OffsetDateTime;

const BASIC: &str = "Commands:
- /list show online players
- /bind <player> bind your account to a Minecraft player
- /mc <message> send a chat message into the game
- /ping check that the bot is online";

const ADMIN: &str = "Admin commands:
- /bind manage player bindings, send /bind for details
- /command <command> run a server console command
- /whitelist <add|remove> <player> manage the whitelist, send /whitelist for details
- /start /stop /restart control the server process
- /info host information (private chat only)
- /reload reload the bot
- /ban <id> ban the player bound to an account (in game)
- /pardon <id> lift an in-game ban
- /bot-ban <id> stop an account from using the bot
- /bot-pardon <id> let an account use the bot again
- /save write configuration and data files";

pub const BIND: &str = "/bind <player> bind your account to a Minecraft player
/bind <id> <player> bind an account to a Minecraft player
/bind unbind <id> remove an account's binding
/bind query TG|ID <id|player> look up a binding by account or by player";

pub const WHITELIST: &str = "/whitelist <add|remove> <player> manage the whitelist
/whitelist list show the whitelist
/whitelist reload reload the whitelist file
/whitelist on enable the whitelist
/whitelist off disable the whitelist";

#[must_use]
pub fn help_text(privilege: CallerPrivilege) -> String {
    let header = format!("Telegram Chat v{VERSION}");
    match privilege {
        CallerPrivilege::Admin => format!("{header}\n\n{BASIC}\n\n{ADMIN}"),
        CallerPrivilege::User => format!("{header}\n\n{BASIC}"),
    }
}

/// Replies with fixed text, e.g. the sub-help for a bare `/bind`.
#[derive(Debug)]
pub struct StaticReply(pub &'static str);

#[async_trait]
impl CommandHandler for StaticReply {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        _privilege: CallerPrivilege,
    ) -> Result<()> {
        ctx.gateway.reply(reply, self.0).await
    }
}

#[derive(Debug)]
pub struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        ctx.gateway.reply(reply, help_text(privilege)).await
    }
}

#[derive(Debug)]
pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        _privilege: CallerPrivilege,
    ) -> Result<()> {
        let elapsed = OffsetDateTime::now_utc() - event.date;
        let delay_ms = (elapsed.as_seconds_f64() * 1000.0).max(0.0);
        ctx.gateway
            .reply(reply, format!("Pong! The bot is online, latency {delay_ms:.2}ms."))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ADMIN, GROUP, USER, send};
    use bridge_core::testing::TestBed;

    #[tokio::test]
    async fn help_depends_on_privilege() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, USER, "/help").await;
        send(&bed, ADMIN, "/help").await;
        let texts = bed.out.texts();
        assert!(!texts[0].contains("/bot-ban"));
        assert!(texts[1].contains("/bot-ban"));
        assert!(texts[1].starts_with("Telegram Chat v"));
    }

    #[tokio::test]
    async fn bare_bind_shows_sub_help() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, USER, "/bind").await;
        send(&bed, USER, "/whitelist").await;
        assert_eq!(bed.out.texts(), vec![BIND.to_owned(), WHITELIST.to_owned()]);
    }

    #[tokio::test]
    async fn ping_replies_to_the_message() {
        let bed = TestBed::new(&[], GROUP).await;
        send(&bed, USER, "/ping").await;
        let sent = bed.out.sent();
        assert!(sent[0].text.starts_with("Pong!"));
        assert_eq!(sent[0].reply_to, Some(10));
        assert_eq!(sent[0].chat_id, GROUP);
    }
}
