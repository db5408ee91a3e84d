//! Minimal Bot API client over HTTPS: `getMe`, `getUpdates` and `sendMessage`.

use core::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bridge_core::{
    ChatRef, ChatScope, EntityKind, InboundEvent, Outbound, OutgoingMessage, Sender,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned, de::IgnoredAny};
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::lifecycle::PollingClient;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Bad credential or endpoint. Retrying will not help.
    #[error("Bot API refused the bot: {0}")]
    Fatal(String),
    #[error("Bot API request failed: {0}")]
    Transient(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i32,
    pub date: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

impl Update {
    /// `None` for update kinds the bridge does not handle.
    #[must_use]
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message?;
        let date = OffsetDateTime::from_unix_timestamp(message.date)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        Some(InboundEvent {
            chat: Some(ChatRef {
                id: message.chat.id,
                scope: ChatScope::from_chat_type(&message.chat.kind),
            }),
            sender: message.from.map(|user| Sender {
                id: user.id,
                display_name: user.display_name(),
            }),
            message_id: message.message_id,
            text: message.text,
            date,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_parameters: Option<ReplyParameters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entities: Vec<WireEntity>,
}

#[derive(Debug, Serialize)]
struct ReplyParameters {
    message_id: i32,
    allow_sending_without_reply: bool,
}

#[derive(Debug, Serialize)]
struct WireEntity {
    #[serde(rename = "type")]
    kind: &'static str,
    offset: usize,
    length: usize,
}

impl<'a> SendMessage<'a> {
    fn from_outgoing(message: &'a OutgoingMessage) -> Self {
        Self {
            chat_id: message.chat_id,
            text: &message.text,
            reply_parameters: message.reply_to.map(|message_id| ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
            entities: message
                .entities
                .iter()
                .map(|e| WireEntity {
                    kind: match e.kind {
                        EntityKind::Bold => "bold",
                        EntityKind::Italic => "italic",
                    },
                    offset: e.offset,
                    length: e.length,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramApi {
    http: Client,
    /// `<api>/bot<token>`. Never logged.
    base: String,
    poll_timeout_secs: u64,
}

impl TelegramApi {
    /// The client keeps no idle connections: it is shared between the polling
    /// runtime and the host runtime, and a pooled connection must not outlive
    /// the runtime that opened it.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Fatal`] for an empty token or an unusable HTTP client.
    pub fn new(api_url: &str, token: &str, poll_timeout_secs: u64) -> Result<Self, TransportError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TransportError::Fatal("no bot token configured".to_owned()));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        Ok(Self {
            http,
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
            poll_timeout_secs,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("{method}: {}", e.without_url())))?;
        let status = response.status();
        let envelope: Envelope<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                return Err(classify(
                    status.as_u16(),
                    format!("{method}: {status}: {}", e.without_url()),
                ));
            }
        };
        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| TransportError::Transient(format!("{method}: empty result")));
        }
        let code = envelope.error_code.unwrap_or_else(|| status.as_u16());
        let detail = envelope
            .description
            .unwrap_or_else(|| status.to_string());
        Err(classify(code, format!("{method}: {detail}")))
    }

    /// # Errors
    ///
    /// Fatal when the token is rejected; transient otherwise.
    pub async fn get_me(&self) -> Result<User, TransportError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-polls for updates after `offset`, acknowledging everything before it.
    ///
    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body).await
    }

    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let _: IgnoredAny = self
            .call("sendMessage", &SendMessage::from_outgoing(message))
            .await?;
        Ok(())
    }
}

fn classify(code: u16, detail: String) -> TransportError {
    if code == StatusCode::UNAUTHORIZED.as_u16() || code == StatusCode::NOT_FOUND.as_u16() {
        TransportError::Fatal(detail)
    } else {
        TransportError::Transient(detail)
    }
}

#[async_trait]
impl Outbound for TelegramApi {
    async fn send_message(&self, message: OutgoingMessage) -> Result<()> {
        Ok(self.send(&message).await?)
    }
}

#[async_trait]
impl PollingClient for TelegramApi {
    async fn connect(&self) -> Result<String, TransportError> {
        let me = self.get_me().await?;
        debug!(id = me.id, username = ?me.username, "Bot API connection confirmed");
        Ok(me.username.unwrap_or(me.first_name))
    }

    async fn poll(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        self.get_updates(offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::TextEntity;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[test]
    fn group_message_becomes_inbound_event() {
        let raw = r#"{
            "update_id": 9001,
            "message": {
                "message_id": 77,
                "date": 1700000000,
                "chat": {"id": -1001, "type": "supergroup", "title": "Server"},
                "from": {"id": 12345, "is_bot": false, "first_name": "Ada", "last_name": "L"},
                "text": "/list"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert_eq!(update.update_id, 9001);
        let event = update.into_event().unwrap();
        assert_eq!(
            event.chat,
            Some(ChatRef {
                id: -1001,
                scope: ChatScope::Group
            })
        );
        assert_eq!(event.sender.as_ref().unwrap().display_name, "Ada L");
        assert_eq!(event.message_id, 77);
        assert_eq!(event.text.as_deref(), Some("/list"));
        assert_eq!(event.date.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn non_message_updates_are_skipped() {
        let update: Update =
            serde_json::from_str(r#"{"update_id": 1, "edited_message": {}}"#).unwrap();
        assert!(update.into_event().is_none());
    }

    #[test]
    fn send_body_threads_and_formats() {
        let message = OutgoingMessage {
            chat_id: -100,
            text: "Steve:\nhi".to_owned(),
            reply_to: Some(5),
            entities: vec![TextEntity::bold(0, 6)],
        };
        let body = serde_json::to_value(SendMessage::from_outgoing(&message)).unwrap();
        assert_eq!(body["chat_id"], -100);
        assert_eq!(body["reply_parameters"]["message_id"], 5);
        assert_eq!(body["entities"][0]["type"], "bold");
        assert_eq!(body["entities"][0]["length"], 6);

        let plain = OutgoingMessage {
            reply_to: None,
            entities: Vec::new(),
            ..message
        };
        let body = serde_json::to_value(SendMessage::from_outgoing(&plain)).unwrap();
        assert!(body.get("reply_parameters").is_none());
        assert!(body.get("entities").is_none());
    }

    #[test]
    fn unauthorized_and_not_found_are_fatal() {
        assert!(classify(401, String::new()).is_fatal());
        assert!(classify(404, String::new()).is_fatal());
        assert!(!classify(429, String::new()).is_fatal());
        assert!(!classify(502, String::new()).is_fatal());
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(TelegramApi::new("https://api.telegram.org", "  ", 30)
            .unwrap_err()
            .is_fatal());
    }

    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0_u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn rejected_token_is_fatal() {
        let url = serve_once(
            "401 Unauthorized",
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .await;
        let api = TelegramApi::new(&url, "123:abc", 1).unwrap();
        let err = api.connect().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn get_me_reports_username() {
        let url = serve_once(
            "200 OK",
            r#"{"ok":true,"result":{"id":1,"is_bot":true,"first_name":"Craft","username":"CraftBot"}}"#,
        )
        .await;
        let api = TelegramApi::new(&url, "123:abc", 1).unwrap();
        assert_eq!(api.connect().await.unwrap(), "CraftBot");
    }
}
