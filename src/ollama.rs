use anyhow::{Context, Result};
use bytes::BytesMut;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_predict: usize,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Streams assistant text deltas from `/api/chat`. The stream ends after
    /// the `done` line or when the server closes the connection.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            temperature: f32,
            num_predict: usize,
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatReq {
                model,
                messages,
                stream: true,
                options: ChatOptions {
                    temperature: options.temperature,
                    num_predict: options.num_predict,
                },
            })
            .send()
            .await
            .context("failed to call ollama chat endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/chat returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buf = BytesMut::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("ollama chat stream interrupted")?;
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    match parse_chat_line(&line)? {
                        ChatLine::Delta(text) => {
                            yield text;
                        }
                        ChatLine::Skip => {}
                        ChatLine::Done => break 'read,
                    }
                }
            }
            if !buf.is_empty() {
                if let ChatLine::Delta(text) = parse_chat_line(&buf)? {
                    yield text;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ChatLine {
    Delta(String),
    Skip,
    Done,
}

fn parse_chat_line(line: &[u8]) -> Result<ChatLine> {
    #[derive(Deserialize)]
    struct ChatChunk {
        #[serde(default)]
        message: Option<ChunkMessage>,
        #[serde(default)]
        done: bool,
        #[serde(default)]
        error: Option<String>,
    }

    #[derive(Deserialize)]
    struct ChunkMessage {
        #[serde(default)]
        content: String,
    }

    let text = std::str::from_utf8(line).context("ollama sent invalid UTF-8")?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(ChatLine::Skip);
    }

    let chunk: ChatChunk =
        serde_json::from_str(text).context("failed to decode ollama chat stream line")?;
    if let Some(err) = chunk.error {
        anyhow::bail!("ollama chat stream error: {err}");
    }

    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    if !content.is_empty() {
        // Ollama may attach the last token to the done line.
        return Ok(ChatLine::Delta(content));
    }
    if chunk.done {
        return Ok(ChatLine::Done);
    }
    Ok(ChatLine::Skip)
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn options() -> GenerationOptions {
        GenerationOptions {
            temperature: 0.7,
            num_predict: 64,
        }
    }

    #[test]
    fn parses_delta_and_done_lines() {
        assert_eq!(
            parse_chat_line(br#"{"message":{"role":"assistant","content":"Halo"},"done":false}"#)
                .unwrap(),
            ChatLine::Delta("Halo".to_string())
        );
        assert_eq!(
            parse_chat_line(br#"{"message":{"role":"assistant","content":""},"done":true}"#)
                .unwrap(),
            ChatLine::Done
        );
        assert_eq!(parse_chat_line(b"  \n").unwrap(), ChatLine::Skip);
        assert!(parse_chat_line(br#"{"error":"model not found"}"#).is_err());
    }

    #[test]
    fn error_body_prefers_json_error_field() {
        assert_eq!(normalize_err_body(r#"{"error":"boom"}"#), "boom");
        assert_eq!(normalize_err_body("  "), "<empty body>");
        assert_eq!(normalize_err_body("plain"), "plain");
    }

    #[tokio::test]
    async fn streams_ndjson_deltas() {
        let server = wiremock::MockServer::start().await;
        let body = [
            r#"{"message":{"role":"assistant","content":"Ini "},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"jawaban."},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"\nARTIKEL 1"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ]
        .join("\n");
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri());
        let messages = vec![ChatMessage::new(Role::User, "Apa kabar?")];
        let stream = client
            .chat_stream("test-model", &messages, options())
            .await
            .unwrap();
        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;

        assert_eq!(deltas.concat(), "Ini jawaban.\nARTIKEL 1");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(
                wiremock::ResponseTemplate::new(404)
                    .set_body_raw(r#"{"error":"model 'x' not found"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri());
        let err = match client.chat_stream("x", &[], options()).await {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("model 'x' not found"));
    }
}
