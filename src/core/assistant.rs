//! Upstream model client.
//!
//! Streams an Anthropic-style messages request and forwards text deltas as
//! they arrive. Overloaded responses are retried with exponential backoff;
//! any other upstream failure propagates to the caller immediately.

use crate::error::{Result, ServiceError};
use crate::infrastructure::entities;
use async_stream::stream;
use di::{inject, injectable};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use log::warn;
use std::env;
use std::time::Duration;

/// Messages sent upstream per call: the system prompt plus this many of the
/// most recent conversation turns.
pub const CONTEXT_WINDOW: usize = 12;

/// Additional attempts after the first on an overloaded upstream.
pub const MAX_RETRIES: u32 = 2;

const BACKOFF_CAP_SECS: u64 = 8;
const MAX_COMPLETION_TOKENS: u32 = 1024;

/// Delay before retry `attempt` (1-based): 2s, 4s, 8s, capped there.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64
        .saturating_pow(attempt.min(63))
        .min(BACKOFF_CAP_SECS)
        .max(2);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Upstream accepted the request; input token count for accounting.
    Start { input_tokens: i64 },
    /// A text delta to forward to the client.
    Delta { text: String },
    /// Generation finished; output token count for accounting.
    Done { output_tokens: i64 },
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl From<entities::Message> for ChatMessage {
    fn from(m: entities::Message) -> Self {
        Self {
            content: m.text,
            role: match m.kind {
                entities::MessageKind::System => Role::System,
                entities::MessageKind::User => Role::User,
                entities::MessageKind::Bot => Role::Assistant,
            },
        }
    }
}

/// DI seam over the upstream completion API, so tests can run without a
/// network.
pub trait ModelClient: Send + Sync {
    /// `messages` are the user/assistant turns; the system prompt travels
    /// separately.
    fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system: Option<String>,
    ) -> BoxStream<'static, Result<StreamEvent>>;
}

#[derive(Clone)]
pub struct UpstreamModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[injectable(ModelClient)]
impl UpstreamModelClient {
    #[inject]
    pub fn create() -> UpstreamModelClient {
        dotenvy::dotenv().ok();

        UpstreamModelClient {
            http: reqwest::Client::new(),
            base_url: env::var("UPSTREAM_API_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_owned()),
            api_key: env::var("UPSTREAM_API_KEY").unwrap_or_default(),
            model: env::var("UPSTREAM_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_owned()),
        }
    }

    async fn open_stream(
        &self,
        messages: &[ChatMessage],
        system: Option<&str>,
    ) -> Result<reqwest::Response> {
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_COMPLETION_TOKENS,
            "stream": true,
            "system": system,
            "messages": turns,
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 || status == 529 {
            return Err(ServiceError::UpstreamOverloaded);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!("upstream returned status {status}")));
        }

        Ok(response)
    }
}

impl ModelClient for UpstreamModelClient {
    fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        system: Option<String>,
    ) -> BoxStream<'static, Result<StreamEvent>> {
        let client = self.clone();

        Box::pin(stream! {
            let mut attempt: u32 = 0;

            'attempts: loop {
                let response = match client.open_stream(&messages, system.as_deref()).await {
                    Ok(response) => response,
                    Err(ServiceError::UpstreamOverloaded) if attempt < MAX_RETRIES => {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        warn!("upstream overloaded, retry {attempt}/{MAX_RETRIES} in {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue 'attempts;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut body = response.bytes_stream();
                let mut buf = String::new();
                let mut yielded = false;

                loop {
                    let frame = match next_frame(&mut body, &mut buf).await {
                        Ok(Some(frame)) => frame,
                        Ok(None) => return,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };

                    match parse_frame(&frame) {
                        Ok(Some(event)) => {
                            let done = matches!(event, StreamEvent::Done { .. });
                            yielded = true;
                            yield Ok(event);
                            if done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        // An overload surfaced before any content: still retryable.
                        Err(ServiceError::UpstreamOverloaded)
                            if !yielded && attempt < MAX_RETRIES =>
                        {
                            attempt += 1;
                            let delay = backoff_delay(attempt);
                            warn!("upstream overloaded mid-handshake, retry {attempt}/{MAX_RETRIES} in {delay:?}");
                            tokio::time::sleep(delay).await;
                            continue 'attempts;
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Pulls the next SSE frame (blank-line delimited) out of the byte stream.
async fn next_frame<S, B, E>(body: &mut S, buf: &mut String) -> Result<Option<String>>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    loop {
        if let Some(pos) = buf.find("\n\n") {
            let frame = buf[..pos].to_owned();
            buf.drain(..pos + 2);
            if frame.trim().is_empty() {
                continue;
            }
            return Ok(Some(frame));
        }

        match body.next().await {
            Some(Ok(chunk)) => {
                buf.push_str(&String::from_utf8_lossy(chunk.as_ref()).replace("\r\n", "\n"));
            }
            Some(Err(e)) => return Err(ServiceError::Upstream(format!("stream read failed: {e}"))),
            None => {
                let rest = std::mem::take(buf);
                if rest.trim().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(rest));
            }
        }
    }
}

/// Maps one SSE frame to a stream event. Frames the accounting doesn't care
/// about (ping, content_block_start/stop, message_stop) map to None.
fn parse_frame(frame: &str) -> Result<Option<StreamEvent>> {
    let mut event_name = "";
    let mut data = String::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim());
        }
    }

    let payload = || -> Result<serde_json::Value> {
        serde_json::from_str(&data)
            .map_err(|_| ServiceError::Upstream(format!("malformed {event_name} payload")))
    };

    match event_name {
        "message_start" => {
            let v = payload()?;
            let input_tokens = v["message"]["usage"]["input_tokens"].as_i64().unwrap_or(0);
            Ok(Some(StreamEvent::Start { input_tokens }))
        }
        "content_block_delta" => {
            let v = payload()?;
            match v["delta"]["text"].as_str() {
                Some(text) => Ok(Some(StreamEvent::Delta { text: text.to_owned() })),
                None => Ok(None),
            }
        }
        "message_delta" => {
            let v = payload()?;
            let output_tokens = v["usage"]["output_tokens"].as_i64().unwrap_or(0);
            Ok(Some(StreamEvent::Done { output_tokens }))
        }
        "error" => {
            let v = payload()?;
            if v["error"]["type"].as_str() == Some("overloaded_error") {
                Err(ServiceError::UpstreamOverloaded)
            } else {
                let message = v["error"]["message"].as_str().unwrap_or("unknown error");
                Err(ServiceError::Upstream(message.to_owned()))
            }
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::convert::Infallible;
    use uuid::Uuid;

    #[test]
    fn test_chat_message_from_user_entity() {
        let user_message = entities::Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            kind: entities::MessageKind::User,
            created_at: Utc::now(),
            text: "Hello".to_string(),
        };

        let chat_message: ChatMessage = user_message.into();
        assert!(matches!(chat_message.role, Role::User));
        assert_eq!(chat_message.content, "Hello");
    }

    #[test]
    fn test_chat_message_from_bot_entity() {
        let bot_message = entities::Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            kind: entities::MessageKind::Bot,
            created_at: Utc::now(),
            text: "Hi there!".to_string(),
        };

        let chat_message: ChatMessage = bot_message.into();
        assert!(matches!(chat_message.role, Role::Assistant));
        assert_eq!(chat_message.content, "Hi there!");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn parses_message_start_tokens() {
        let frame = "event: message_start\ndata: {\"message\":{\"usage\":{\"input_tokens\":42}}}";
        assert_eq!(
            parse_frame(frame).unwrap(),
            Some(StreamEvent::Start { input_tokens: 42 })
        );
    }

    #[test]
    fn parses_text_delta() {
        let frame =
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}";
        assert_eq!(
            parse_frame(frame).unwrap(),
            Some(StreamEvent::Delta { text: "Hi".to_owned() })
        );
    }

    #[test]
    fn parses_message_delta_as_done() {
        let frame = "event: message_delta\ndata: {\"usage\":{\"output_tokens\":17}}";
        assert_eq!(
            parse_frame(frame).unwrap(),
            Some(StreamEvent::Done { output_tokens: 17 })
        );
    }

    #[test]
    fn ping_and_block_boundaries_are_skipped() {
        assert_eq!(parse_frame("event: ping\ndata: {}").unwrap(), None);
        assert_eq!(
            parse_frame("event: content_block_stop\ndata: {\"index\":0}").unwrap(),
            None
        );
    }

    #[test]
    fn overloaded_error_is_classified_retryable() {
        let frame = "event: error\ndata: {\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}";
        assert!(matches!(
            parse_frame(frame),
            Err(ServiceError::UpstreamOverloaded)
        ));
    }

    #[test]
    fn other_errors_propagate_with_their_message() {
        let frame = "event: error\ndata: {\"error\":{\"type\":\"invalid_request_error\",\"message\":\"bad request\"}}";
        match parse_frame(frame) {
            Err(ServiceError::Upstream(message)) => assert_eq!(message, "bad request"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_reassemble_across_chunk_boundaries() {
        let chunks: Vec<std::result::Result<&[u8], Infallible>> = vec![
            Ok(b"event: ping\nda"),
            Ok(b"ta: {}\n\nevent: message_delta\n"),
            Ok(b"data: {\"usage\":{\"output_tokens\":5}}\n\n"),
        ];
        let mut body = futures_util::stream::iter(chunks);
        let mut buf = String::new();

        let first = next_frame(&mut body, &mut buf).await.unwrap().unwrap();
        assert!(first.starts_with("event: ping"));

        let second = next_frame(&mut body, &mut buf).await.unwrap().unwrap();
        assert_eq!(parse_frame(&second).unwrap(), Some(StreamEvent::Done { output_tokens: 5 }));

        assert_eq!(next_frame(&mut body, &mut buf).await.unwrap(), None);
    }
}
