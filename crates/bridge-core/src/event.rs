use async_trait::async_trait;
use time::OffsetDateTime;

/// Privilege of a remote caller. Recomputed for every event from the admin allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerPrivilege {
    User,
    Admin,
}

impl CallerPrivilege {
    #[must_use]
    pub const fn from_admin(is_admin: bool) -> Self {
        if is_admin { Self::Admin } else { Self::User }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    Private,
    Group,
    Other,
}

impl ChatScope {
    /// `group` and `supergroup` are the same scope as far as routing is concerned.
    #[must_use]
    pub fn from_chat_type(kind: &str) -> Self {
        match kind {
            "private" => Self::Private,
            "group" | "supergroup" => Self::Group,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: i64,
    pub scope: ChatScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub display_name: String,
}

/// Transport-neutral inbound message. Fields the transport could not provide are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat: Option<ChatRef>,
    pub sender: Option<Sender>,
    pub message_id: i32,
    pub text: Option<String>,
    pub date: OffsetDateTime,
}

impl InboundEvent {
    #[must_use]
    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id)
    }

    #[must_use]
    pub fn scope(&self) -> Option<ChatScope> {
        self.chat.as_ref().map(|c| c.scope)
    }
}

/// Receives every inbound event on the polling task's execution context.
///
/// Implementations run inline with polling: anything slow here delays delivery
/// of the next event.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_event(&self, event: InboundEvent);

    /// Called once the transport has confirmed the connection.
    async fn on_connected(&self, _username: &str) {}
}

/// Events observed on the game side, flowing towards the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Chat { player: String, content: String },
    Joined { player: String },
    Left { player: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supergroup_is_group_scope() {
        assert_eq!(ChatScope::from_chat_type("supergroup"), ChatScope::Group);
        assert_eq!(ChatScope::from_chat_type("group"), ChatScope::Group);
        assert_eq!(ChatScope::from_chat_type("private"), ChatScope::Private);
        assert_eq!(ChatScope::from_chat_type("channel"), ChatScope::Other);
    }

    #[test]
    fn privilege_from_admin_flag() {
        assert!(CallerPrivilege::from_admin(true).is_admin());
        assert!(!CallerPrivilege::from_admin(false).is_admin());
    }
}
