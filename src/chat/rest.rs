//! REST client for the chat platform's messages API.

use crate::chat::{Attachment, ChatClient, ChatError, Embed, OutgoingMessage};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RestChatClient {
    client: reqwest::Client,
    token: String,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    embeds: &'a [Embed],
}

impl RestChatClient {
    pub fn new(token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, token }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ChatError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn attachment_form(
        payload: &serde_json::Value,
        attachments: &[Attachment],
    ) -> Result<multipart::Form, ChatError> {
        let mut form = multipart::Form::new().text("payload_json", payload.to_string());
        for (i, attachment) in attachments.iter().enumerate() {
            let part = multipart::Part::bytes(attachment.bytes.clone())
                .file_name(attachment.filename.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| ChatError::InvalidResponse(format!("bad attachment: {}", e)))?;
            form = form.part(format!("files[{}]", i), part);
        }
        Ok(form)
    }

    fn parse_message_id(value: &serde_json::Value) -> Result<u64, ChatError> {
        value
            .get("id")
            .and_then(|id| id.as_str())
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ChatError::InvalidResponse("response carries no message id".to_string()))
    }
}

#[async_trait]
impl ChatClient for RestChatClient {
    async fn send_message(
        &self,
        channel_id: u64,
        message: OutgoingMessage,
    ) -> Result<u64, ChatError> {
        let url = format!("{}/channels/{}/messages", API_BASE, channel_id);

        let request = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header());

        let response = if message.attachments.is_empty() {
            request
                .json(&MessagePayload {
                    content: message.content.as_deref(),
                    embeds: &message.embeds,
                })
                .send()
                .await?
        } else {
            let payload = json!({
                "content": message.content,
                "embeds": message.embeds,
            });
            let form = Self::attachment_form(&payload, &message.attachments)?;
            request.multipart(form).send().await?
        };

        let response = Self::check_status(response).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(format!("unparseable response: {}", e)))?;

        Self::parse_message_id(&body)
    }

    async fn edit_message(
        &self,
        channel_id: u64,
        message_id: u64,
        content: String,
    ) -> Result<(), ChatError> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            API_BASE, channel_id, message_id
        );

        let response = self
            .client
            .patch(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({ "content": content }))
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }
}
