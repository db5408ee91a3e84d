use core::fmt;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::{BridgeContext, CallerPrivilege, InboundEvent, ReplySink};

/// Type tag applied to one captured group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
}

/// Coerced arguments handed to a command handler, in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs(Vec<Arg>);

impl CommandArgs {
    #[must_use]
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    #[must_use]
    pub fn str(&self, idx: usize) -> Option<&str> {
        match self.0.get(idx)? {
            Arg::Str(s) => Some(s.as_str()),
            Arg::Int(_) => None,
        }
    }

    #[must_use]
    pub fn int(&self, idx: usize) -> Option<i64> {
        match self.0.get(idx)? {
            Arg::Int(n) => Some(*n),
            Arg::Str(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub enum Matcher {
    /// Single-word literals match exactly; multi-word literals also match as a
    /// leading phrase followed by whitespace.
    Literal(String),
    Pattern { expr: Regex, types: Vec<ArgType> },
}

impl Matcher {
    /// Compiles `expr` anchored at both ends.
    ///
    /// # Errors
    ///
    /// Fails when the expression does not compile or its group count differs from `types`.
    pub fn pattern(expr: &str, types: &[ArgType]) -> Result<Self> {
        let compiled = Regex::new(&format!("^(?:{expr})$"))
            .with_context(|| format!("compiling command pattern {expr:?}"))?;
        let groups = compiled.captures_len() - 1;
        if groups != types.len() {
            return Err(anyhow!(
                "command pattern {expr:?} has {groups} groups but {} argument types",
                types.len()
            ));
        }
        Ok(Self::Pattern {
            expr: compiled,
            types: types.to_vec(),
        })
    }

    /// `None` means no structural match; `Some(None)` means matched but coercion failed.
    fn apply(&self, text: &str) -> Option<Option<CommandArgs>> {
        match self {
            Self::Literal(literal) => {
                let exact = text == literal;
                let leading = literal.contains(' ')
                    && text
                        .strip_prefix(literal.as_str())
                        .is_some_and(|rest| rest.starts_with(char::is_whitespace));
                (exact || leading).then(|| Some(CommandArgs::default()))
            }
            Self::Pattern { expr, types } => {
                let caps = expr.captures(text)?;
                let mut args = Vec::with_capacity(types.len());
                for (idx, ty) in types.iter().enumerate() {
                    let raw = caps.get(idx + 1).map_or("", |m| m.as_str());
                    match coerce(raw, *ty) {
                        Some(arg) => args.push(arg),
                        None => {
                            debug!(pattern = %expr, capture = raw, "Argument coercion failed");
                            return Some(None);
                        }
                    }
                }
                Some(Some(CommandArgs(args)))
            }
        }
    }
}

fn coerce(raw: &str, ty: ArgType) -> Option<Arg> {
    match ty {
        ArgType::String => Some(Arg::Str(raw.to_owned())),
        ArgType::Integer => raw.parse::<i64>().ok().map(Arg::Int),
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        args: &CommandArgs,
        privilege: CallerPrivilege,
    ) -> Result<()>;
}

struct CommandPattern {
    matcher: Matcher,
    handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for CommandPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPattern")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`CommandDispatcher::resolve`].
pub struct Resolved<'a> {
    /// Registration position of the matching pattern.
    pub index: usize,
    pub handler: &'a Arc<dyn CommandHandler>,
    pub args: CommandArgs,
}

impl fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("index", &self.index)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Ordered list of command patterns. The first structural match wins; there is
/// no specificity ranking, so narrower patterns must be registered first.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    patterns: Vec<CommandPattern>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, matcher: Matcher, handler: Arc<dyn CommandHandler>) {
        self.patterns.push(CommandPattern { matcher, handler });
    }

    pub fn register_literal(&mut self, literal: &str, handler: Arc<dyn CommandHandler>) {
        self.register(Matcher::Literal(literal.to_owned()), handler);
    }

    /// # Errors
    ///
    /// See [`Matcher::pattern`].
    pub fn register_pattern(
        &mut self,
        expr: &str,
        types: &[ArgType],
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        self.register(Matcher::pattern(expr, types)?, handler);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    #[must_use]
    pub fn resolve(&self, text: &str) -> Option<Resolved<'_>> {
        for (index, pattern) in self.patterns.iter().enumerate() {
            match pattern.matcher.apply(text) {
                None => {}
                Some(None) => return None,
                Some(Some(args)) => {
                    return Some(Resolved {
                        index,
                        handler: &pattern.handler,
                        args,
                    });
                }
            }
        }
        None
    }

    /// Resolves `text` and runs the handler. Returns whether a handler ran.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub async fn dispatch(
        &self,
        ctx: &BridgeContext,
        event: &InboundEvent,
        reply: &ReplySink,
        text: &str,
        privilege: CallerPrivilege,
    ) -> Result<bool> {
        let Some(resolved) = self.resolve(text) else {
            debug!(text, "No command handler matched");
            return Ok(false);
        };
        debug!(index = resolved.index, args = ?resolved.args, ?privilege, "Command handler matched");
        resolved
            .handler
            .handle(ctx, event, reply, &resolved.args, privilege)
            .await?;
        Ok(true)
    }
}
