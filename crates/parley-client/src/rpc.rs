//! [`RpcClient`] over the gateway's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use parley_shared::protocol::Author;
use parley_shared::{ChannelId, MessageId, Nonce};

use crate::collaborators::{RpcClient, SendMessageRequest};
use crate::error::RpcError;

#[derive(Serialize)]
struct PostMessageBody<'a> {
    content: &'a str,
    nonce: Nonce,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a MessageId>,
    author: &'a Author,
}

#[derive(Serialize)]
struct ReadBody<'a> {
    message_id: &'a MessageId,
}

pub struct HttpRpcClient {
    client: reqwest::Client,
    base_url: String,
    author: Author,
}

impl HttpRpcClient {
    pub fn new(base_url: impl Into<String>, author: Author) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RpcError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            author,
        })
    }

    fn url(&self, channel_id: &ChannelId, tail: &str) -> String {
        format!("{}/api/channels/{}/{}", self.base_url, channel_id, tail)
    }

    async fn post<B: Serialize + ?Sized>(&self, url: String, body: &B) -> Result<(), RpcError> {
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError(format!("Cannot reach server: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(RpcError(format!("Server responded {status}: {detail}")));
        }
        debug!(url = %url, status = %status, "RPC succeeded");
        Ok(())
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn send_message(&self, request: SendMessageRequest) -> Result<(), RpcError> {
        let body = PostMessageBody {
            content: &request.content,
            nonce: request.nonce,
            reply_to: request.reply_to.as_ref(),
            author: &self.author,
        };
        self.post(self.url(&request.channel_id, "messages"), &body).await
    }

    async fn acknowledge_read(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<(), RpcError> {
        self.post(self.url(channel_id, "read"), &ReadBody { message_id })
            .await
    }
}
