//! Client side of the chat and metadata endpoints.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;

use crate::models::{
    ArticleMetadata, ChatMessage, ChatRequest, MetadataResponse, QuestionsResponse, StreamEvent,
};

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_metadata(&self) -> Result<Vec<ArticleMetadata>>;

    /// Streams raw assistant text deltas for the given conversation.
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_questions(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/questions", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to call questions endpoint")?
            .error_for_status()
            .context("questions endpoint returned non-success status")?
            .json::<QuestionsResponse>()
            .await
            .context("failed to decode questions response")?;
        Ok(response.questions)
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn fetch_metadata(&self) -> Result<Vec<ArticleMetadata>> {
        let url = format!("{}/api/news/metadata", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to call metadata endpoint")?
            .error_for_status()
            .context("metadata endpoint returned non-success status")?
            .json::<MetadataResponse>()
            .await
            .context("failed to decode metadata response")?;
        Ok(response.metadata)
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatRequest { messages })
            .send()
            .await
            .context("failed to call chat endpoint")?
            .error_for_status()
            .context("chat endpoint returned non-success status")?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("chat stream interrupted")?;
                for data in decoder.push(&chunk)? {
                    match decode_event(&data)? {
                        StreamEvent::Delta { text } => {
                            yield text;
                        }
                        StreamEvent::Done => break 'read,
                        StreamEvent::Error { message } => {
                            Err::<(), _>(anyhow::anyhow!("chat generation failed: {message}"))?;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn decode_event(data: &str) -> Result<StreamEvent> {
    serde_json::from_str(data).with_context(|| format!("invalid chat stream event: {data}"))
}

/// Incremental `text/event-stream` decoder. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence; only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds raw bytes and returns the data payload of every event completed
    /// by them.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = std::str::from_utf8(&raw).context("event stream is not valid UTF-8")?;
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        Ok(events)
    }
}
