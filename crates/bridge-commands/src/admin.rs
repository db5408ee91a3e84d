use std::env;

use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    BridgeContext, CallerPrivilege, ChatScope, CommandArgs, CommandHandler, HostRequest,
    InboundEvent, ReplySink, VERSION,
};
use time::OffsetDateTime;
use tracing::{info, warn};

/// `/info` (admin, private chat only).
#[derive(Debug)]
pub struct Info;

#[async_trait]
impl CommandHandler for Info {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        _args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()> {
        if !privilege.is_admin() || event.scope() != Some(ChatScope::Private) {
            return Ok(());
        }
        let cpus = std::thread::available_parallelism().map_or(1, core::num::NonZeroUsize::get);
        let uptime = OffsetDateTime::now_utc() - ctx.started_at;
        let lines = [
            "System information:".to_owned(),
            format!("    OS: {} ({})", env::consts::OS, env::consts::FAMILY),
            format!("    Architecture: {}", env::consts::ARCH),
            format!("    CPU cores: {cpus}"),
            String::new(),
            "Bridge:".to_owned(),
            format!("    Version: {VERSION}"),
            format!("    Uptime: {}", format_uptime(uptime.whole_seconds())),
            format!("    Bindings: {}", ctx.bindings.snapshot().await.len()),
            format!("    Bound group: {}", ctx.gateway.group()),
        ];
        ctx.gateway.reply(reply, lines.join("\n")).await
    }
}

fn format_uptime(total: i64) -> String {
    let total = total.max(0);
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

/// `/reload` (admin). The host loop tears this bridge down, so the handler only asks.
#[derive(Debug)]
pub struct Reload;

#[async_trait]
impl CommandHandler for Reload {
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
        ctx.gateway.reply(reply, "Got it, reloading...").await?;
        info!("Reload requested from chat");
        ctx.host.request(HostRequest::Reload);
        Ok(())
    }
}

#[derive(Debug)]
pub struct BotBan;

#[async_trait]
impl CommandHandler for BotBan {
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
        let text = if ctx.bans.ban(id).await? {
            info!(id, "Account banned from the bot");
            format!("Banned account {id} from using the bot.")
        } else {
            format!("Account {id} is already banned.")
        };
        ctx.gateway.reply(reply, text).await
    }
}

#[derive(Debug)]
pub struct BotPardon;

#[async_trait]
impl CommandHandler for BotPardon {
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
        let text = if ctx.bans.pardon(id).await? {
            info!(id, "Account pardoned");
            format!("Account {id} may use the bot again.")
        } else {
            format!("Account {id} is not banned.")
        };
        ctx.gateway.reply(reply, text).await
    }
}

/// `/save` (admin): rewrites the config document and both data files.
#[derive(Debug)]
pub struct Save;

#[async_trait]
impl CommandHandler for Save {
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
        let saved = async {
            ctx.config.save(&ctx.config_path)?;
            ctx.bindings.save().await?;
            ctx.bans.save().await
        }
        .await;
        match saved {
            Ok(()) => ctx.gateway.reply(reply, "Configuration and data saved.").await,
            Err(e) => {
                warn!(error = %e, "Save failed");
                ctx.gateway.reply(reply, format!("Save failed: {e:#}")).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ADMIN, GROUP, USER, send, send_in};
    use bridge_core::{EventRouter, testing::{TestBed, event}};
    use std::sync::Arc;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(59), "0m 59s");
        assert_eq!(format_uptime(3_661), "1h 1m 1s");
        assert_eq!(format_uptime(90_061), "1d 1h 1m 1s");
    }

    #[tokio::test]
    async fn info_only_in_private_chat() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, ADMIN, "/info").await;
        assert!(bed.out.sent().is_empty());
        send_in(&bed, ADMIN, ChatScope::Private, "/info").await;
        let texts = bed.out.texts();
        assert!(texts[0].starts_with("System information:"));
        assert!(texts[0].contains(&format!("Version: {VERSION}")));
    }

    #[tokio::test]
    async fn reload_hands_off_to_the_host() {
        let mut bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, USER, "/reload").await;
        assert!(bed.host_rx.try_recv().is_err());
        send(&bed, ADMIN, "/reload").await;
        assert_eq!(bed.host_rx.try_recv().unwrap(), HostRequest::Reload);
        assert_eq!(bed.out.texts(), vec!["Got it, reloading...".to_owned()]);
    }

    #[tokio::test]
    async fn bot_ban_silences_then_pardon_restores() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        let router = EventRouter::new(
            bed.ctx.clone(),
            Arc::new(crate::build_dispatcher().unwrap()),
        );
        router
            .route(&event(GROUP, ADMIN, ChatScope::Group, "/bot-ban 12345"))
            .await;
        router
            .route(&event(GROUP, USER, ChatScope::Group, "/ping"))
            .await;
        router
            .route(&event(GROUP, USER, ChatScope::Group, "/help"))
            .await;
        assert_eq!(
            bed.out.texts(),
            vec!["Banned account 12345 from using the bot.".to_owned()]
        );

        router
            .route(&event(GROUP, ADMIN, ChatScope::Group, "/bot-pardon 12345"))
            .await;
        router
            .route(&event(GROUP, USER, ChatScope::Group, "/help"))
            .await;
        let texts = bed.out.texts();
        assert_eq!(texts[1], "Account 12345 may use the bot again.");
        assert!(!texts[2].contains("Admin commands"));
    }

    #[tokio::test]
    async fn save_writes_every_document() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, ADMIN, "/save").await;
        assert!(bed.dir.path().join("config.yaml").exists());
        assert!(bed.dir.path().join("bindings.json").exists());
        assert!(bed.dir.path().join("ban_list.json").exists());
        assert_eq!(bed.out.texts(), vec!["Configuration and data saved.".to_owned()]);
    }
}
