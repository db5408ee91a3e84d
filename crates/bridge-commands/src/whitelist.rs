use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    BridgeContext, CallerPrivilege, CommandArgs, CommandHandler, InboundEvent, ReplySink,
};

use crate::{help, whitelist_add, whitelist_remove};

#[derive(Debug)]
pub struct Add;

#[async_trait]
impl CommandHandler for Add {
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
            Some(player) if !player.is_empty() => whitelist_add(ctx, reply, player).await,
            _ => ctx.gateway.reply(reply, help::WHITELIST).await,
        }
    }
}

#[derive(Debug)]
pub struct Remove;

#[async_trait]
impl CommandHandler for Remove {
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
            Some(player) if !player.is_empty() => whitelist_remove(ctx, reply, player).await,
            _ => ctx.gateway.reply(reply, help::WHITELIST).await,
        }
    }
}
