use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    BindOutcome, BridgeContext, CallerPrivilege, CommandArgs, CommandHandler, InboundEvent,
    ProfileError, ReplySink,
};
use tracing::info;

use crate::{help, whitelist_add, whitelist_remove};

const NO_RESULTS: &str = "No results found.";

/// `/bind <player>`: binds the caller's own account.
#[derive(Debug)]
pub struct BindSelf;

#[async_trait]
impl CommandHandler for BindSelf {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        args: &CommandArgs,
        _privilege: CallerPrivilege,
    ) -> Result<()> {
        let (Some(id), Some(player)) = (event.sender_id(), args.str(0)) else {
            return Ok(());
        };
        if player.is_empty() {
            return ctx.gateway.reply(reply, help::BIND).await;
        }
        let id = id.to_string();

        if let Some(existing) = ctx.bindings.player_for(&id).await {
            return ctx.gateway.reply(reply, already_bound(&existing)).await;
        }

        if ctx.config.whitelist.verify_player
            && let Err(e) = ctx.profiles.verify(player).await
        {
            let text = match e {
                ProfileError::Timeout => "Timed out looking up the player profile, please try again.".to_owned(),
                ProfileError::Rejected(detail) => format!(
                    "Could not find a profile for \"{player}\". Check that it is an existing, non-offline player name.\nDetails: {detail}"
                ),
                ProfileError::Transport(detail) => {
                    format!("Player profile lookup failed, please try again.\nDetails: {detail}")
                }
            };
            return ctx.gateway.reply(reply, text).await;
        }

        match ctx.bindings.bind_new(&id, player).await? {
            BindOutcome::AlreadyBound(existing) => {
                ctx.gateway.reply(reply, already_bound(&existing)).await
            }
            BindOutcome::Bound => {
                info!(id = %id, player, "Account bound");
                ctx.gateway
                    .reply(reply, format!("Bound to \"{player}\"."))
                    .await?;
                if ctx.config.whitelist.add_when_bind {
                    whitelist_add(ctx, reply, player).await?;
                }
                Ok(())
            }
        }
    }
}

fn already_bound(existing: &str) -> String {
    format!("You are already bound to \"{existing}\". Ask an admin to change it.")
}

/// `/bind <id> <player>` (admin): rebinds any account, replacing an existing binding.
#[derive(Debug)]
pub struct BindOther;

#[async_trait]
impl CommandHandler for BindOther {
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
        let (Some(id), Some(player)) = (args.str(0), args.str(1)) else {
            return Ok(());
        };
        if id.is_empty() || player.is_empty() {
            return ctx.gateway.reply(reply, help::BIND).await;
        }

        // Swap first: the replies below may fail, the binding change must not.
        let previous = ctx.bindings.rebind(id, player).await?;
        info!(id, player, previous = ?previous, "Account bound by admin");
        if let Some(old) = previous {
            ctx.gateway
                .reply(reply, format!("Unbound account {id} from \"{old}\"."))
                .await?;
            if ctx.config.whitelist.add_when_bind {
                whitelist_remove(ctx, reply, &old).await?;
            }
        }
        ctx.gateway
            .reply(reply, format!("Bound account {id} to \"{player}\"."))
            .await?;
        if ctx.config.whitelist.add_when_bind {
            whitelist_add(ctx, reply, player).await?;
        }
        Ok(())
    }
}

/// `/bind unbind <id>` (admin).
#[derive(Debug)]
pub struct Unbind;

#[async_trait]
impl CommandHandler for Unbind {
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
        match args.str(0) {
            Some(id) if !id.is_empty() => unbind(ctx, reply, id).await,
            _ => ctx.gateway.reply(reply, help::BIND).await,
        }
    }
}

async fn unbind(ctx: &BridgeContext, reply: &ReplySink, id: &str) -> Result<()> {
    let Some(player) = ctx.bindings.unbind(id).await? else {
        return ctx
            .gateway
            .reply(reply, format!("Account {id} is not bound."))
            .await;
    };
    info!(id, player = %player, "Account unbound");
    ctx.gateway
        .reply(reply, format!("Unbound account {id} from \"{player}\"."))
        .await?;
    if ctx.config.whitelist.add_when_bind {
        whitelist_remove(ctx, reply, &player).await?;
    }
    Ok(())
}

/// `/bind query TG <id>` or `/bind query ID <player>` (admin).
#[derive(Debug)]
pub struct Query;

#[async_trait]
impl CommandHandler for Query {
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
        let (Some(kind), Some(value)) = (args.str(0), args.str(1)) else {
            return Ok(());
        };
        let ids = match kind {
            "TG" => ctx
                .bindings
                .player_for(value)
                .await
                .map(|player| vec![(value.to_owned(), player)])
                .unwrap_or_default(),
            _ => ctx
                .bindings
                .ids_for_player(value)
                .await
                .into_iter()
                .map(|id| (id, value.to_owned()))
                .collect(),
        };
        if ids.is_empty() {
            return ctx.gateway.reply(reply, NO_RESULTS).await;
        }
        let lines: Vec<String> = ids
            .iter()
            .map(|(id, player)| format!("Telegram: {id} is bound to \"{player}\""))
            .collect();
        ctx.gateway
            .reply(reply, format!("Found:\n{}", lines.join("\n")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{ADMIN, GROUP, USER, send};
    use bridge_core::{
        Bindings, CallerPrivilege, ChatScope, ReplySink,
        store::BINDINGS_FILE,
        testing::{ProfileMode, TestBed, event},
    };

    #[tokio::test]
    async fn second_bind_keeps_the_first() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, USER, "/bind Steve").await;
        send(&bed, USER, "/bind Alex").await;
        assert_eq!(
            bed.ctx.bindings.player_for("12345").await.as_deref(),
            Some("Steve")
        );
        let texts = bed.out.texts();
        assert_eq!(texts[0], "Bound to \"Steve\".");
        assert_eq!(texts[1], "Added \"Steve\" to the server whitelist.");
        assert!(texts[2].contains("\"Steve\""));
        assert!(texts[2].starts_with("You are already bound"));
        assert_eq!(bed.game.executed(), vec!["whitelist add Steve".to_owned()]);
    }

    #[tokio::test]
    async fn bind_is_persisted_before_the_reply() {
        let bed = TestBed::new(&[], GROUP).await;
        send(&bed, USER, "/bind Steve").await;
        let raw = std::fs::read_to_string(bed.dir.path().join("bindings.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["data"]["12345"], "Steve");
    }

    #[tokio::test]
    async fn profile_timeout_leaves_account_unbound() {
        let bed = TestBed::new(&[], GROUP).await;
        bed.profiles.set_mode(ProfileMode::Timeout);
        send(&bed, USER, "/bind Steve").await;
        assert!(bed.ctx.bindings.player_for("12345").await.is_none());
        assert!(bed.out.texts()[0].contains("try again"));
        assert!(bed.game.executed().is_empty());
    }

    #[tokio::test]
    async fn rejected_profile_inlines_the_detail() {
        let bed = TestBed::new(&[], GROUP).await;
        bed.profiles
            .set_mode(ProfileMode::Reject("Couldn't find any profile with name Stevee".into()));
        send(&bed, USER, "/bind Stevee").await;
        assert!(bed.ctx.bindings.player_for("12345").await.is_none());
        assert!(bed.out.texts()[0].ends_with("Details: Couldn't find any profile with name Stevee"));
    }

    #[tokio::test]
    async fn verification_can_be_switched_off() {
        let bed = TestBed::with_config(&[], GROUP, |c| {
            c.whitelist.verify_player = false;
            c.whitelist.add_when_bind = false;
        })
        .await;
        bed.profiles.set_mode(ProfileMode::Timeout);
        send(&bed, USER, "/bind Steve").await;
        assert!(bed.profiles.asked().is_empty());
        assert_eq!(bed.out.texts(), vec!["Bound to \"Steve\".".to_owned()]);
    }

    #[tokio::test]
    async fn admin_rebind_unbinds_first() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, ADMIN, "/bind 42 Steve").await;
        send(&bed, ADMIN, "/bind 42 Alex").await;
        assert_eq!(bed.ctx.bindings.player_for("42").await.as_deref(), Some("Alex"));
        assert_eq!(
            bed.game.executed(),
            vec![
                "whitelist add Steve".to_owned(),
                "whitelist remove Steve".to_owned(),
                "whitelist add Alex".to_owned(),
            ]
        );
        assert!(bed.out.texts().contains(&"Unbound account 42 from \"Steve\".".to_owned()));
    }

    #[tokio::test]
    async fn admin_rebind_survives_a_failed_reply() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, ADMIN, "/bind 42 Steve").await;
        bed.out.fail_texts_starting_with("Unbound");

        let ev = event(GROUP, ADMIN, ChatScope::Group, "/bind 42 Alex");
        let sink = ReplySink::for_event(&ev).unwrap();
        let result = crate::build_dispatcher()
            .unwrap()
            .dispatch(&bed.ctx, &ev, &sink, "/bind 42 Alex", CallerPrivilege::Admin)
            .await;
        assert!(result.is_err());

        assert_eq!(bed.ctx.bindings.player_for("42").await.as_deref(), Some("Alex"));
        let reloaded = Bindings::load(bed.dir.path().join(BINDINGS_FILE)).await.unwrap();
        assert_eq!(reloaded.player_for("42").await.as_deref(), Some("Alex"));
    }

    #[tokio::test]
    async fn admin_only_bind_commands_are_silent_for_users() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, USER, "/bind 42 Steve").await;
        send(&bed, USER, "/bind unbind 42").await;
        send(&bed, USER, "/bind query TG 42").await;
        assert!(bed.out.sent().is_empty());
        assert!(bed.ctx.bindings.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn query_by_player_lists_every_account() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        bed.ctx.bindings.bind_new("111", "Steve").await.unwrap();
        bed.ctx.bindings.bind_new("222", "Steve").await.unwrap();
        send(&bed, ADMIN, "/bind query ID Steve").await;
        send(&bed, ADMIN, "/bind query TG 111").await;
        send(&bed, ADMIN, "/bind query TG 333").await;
        let texts = bed.out.texts();
        assert_eq!(
            texts[0],
            "Found:\nTelegram: 111 is bound to \"Steve\"\nTelegram: 222 is bound to \"Steve\""
        );
        assert_eq!(texts[1], "Found:\nTelegram: 111 is bound to \"Steve\"");
        assert_eq!(texts[2], "No results found.");
    }

    #[tokio::test]
    async fn unbind_unknown_account_says_so() {
        let bed = TestBed::new(&[ADMIN], GROUP).await;
        send(&bed, ADMIN, "/bind unbind 99").await;
        assert_eq!(bed.out.texts(), vec!["Account 99 is not bound.".to_owned()]);
        assert!(bed.game.executed().is_empty());
    }
}
