// Backend HTTP send paths: message creation and typing-status reports.
// These endpoints are consumed here, never implemented; the backend owns
// persistence and fan-out.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::time::Duration;

use crate::chat::outbox::MessageSender;
use crate::models::{MessageKind, QueuedMessage};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub struct BackendApi {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl BackendApi {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        BackendApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// POST a message to its chat. Used by outbox replay and by the UI's
    /// non-realtime send path.
    pub async fn create_message(&self, message: &QueuedMessage) -> Result<()> {
        let url = format!("{}/chats/{}/messages", self.base_url, message.chat_id);
        let kind = match message.kind {
            MessageKind::Text => "TEXT",
            MessageKind::Media => "MEDIA",
        };
        let body = json!({
            "id": message.id,
            "content": message.content,
            "kind": kind,
            "parentId": message.parent_id,
        });

        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Backend accepted message {}", message.id);
            Ok(())
        } else {
            Err(anyhow!(
                "Backend rejected message {}: HTTP {}",
                message.id,
                response.status()
            ))
        }
    }

    /// POST a typing-status change; the backend fans it out to the chat's
    /// realtime channel subscribers.
    pub async fn report_typing(&self, chat_id: &str, is_typing: bool) -> Result<()> {
        let url = format!("{}/chats/{}/typing", self.base_url, chat_id);
        let response = self
            .authorized(self.http.post(&url))
            .json(&json!({ "isTyping": is_typing }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("Typing report rejected: HTTP {}", response.status()))
        }
    }
}

#[async_trait]
impl MessageSender for BackendApi {
    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        self.create_message(message).await
    }
}
