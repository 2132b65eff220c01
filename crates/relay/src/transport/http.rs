// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the OpenAI-compatible surface.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::epoch_secs;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::models;
use crate::prompt::{self, ChatMessage};
use crate::state::RelayState;
use crate::upstream::conversation::{ConversationGuard, CORNER_TYPE};
use crate::upstream::executor::{ExecuteError, UpstreamRequest};
use crate::upstream::stream::{spawn_translator, TranslatedEvent, Usage};

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChoiceMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub object: &'static str,
    pub owned_by: &'static str,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /v1/models`
pub async fn list_models() -> impl IntoResponse {
    let data = models::aliases()
        .map(|id| ModelInfo { id, object: "model", owned_by: "studio" })
        .collect();
    Json(ModelList { object: "list", data })
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(s): State<Arc<RelayState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> axum::response::Response {
    if req.messages.is_empty() {
        return RelayError::BadRequest
            .to_http_response("`messages` is required and must not be empty")
            .into_response();
    }

    // Never pass a missing/invalid jar into the executor; the caller should
    // retry once the scheduler has recovered the session.
    if !s.auth.snapshot().await.valid {
        return RelayError::ServiceUnavailable
            .to_http_response("no authenticated upstream session, retry later")
            .into_response();
    }

    let alias = req.model.as_deref().unwrap_or_else(|| models::default_alias()).to_owned();
    let upstream_model = models::resolve(&alias);
    let (system_prompt, prompt) = prompt::build_prompt(&req.messages);
    let response_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());

    let guard = match s.conversations.create(&response_id).await {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(err = format!("{e:#}"), "conversation creation failed");
            return RelayError::UpstreamError
                .to_http_response(format!("failed to create upstream conversation: {e}"))
                .into_response();
        }
    };

    let base = s.config.base_url.trim_end_matches('/');
    let payload = chat_payload(&s.config, upstream_model, &system_prompt, &prompt, guard.id());
    let chat_req = UpstreamRequest::post_json(
        format!("{base}/api/chat"),
        payload,
        s.config.chat_timeout(),
    )
    .referer(s.conversations.corner_url(guard.id()));

    let upstream = match s.executor.execute(&chat_req).await {
        Ok(resp) => resp,
        Err(ExecuteError::AuthFailed) => {
            guard.finish().await;
            return RelayError::ServiceUnavailable
                .to_http_response("upstream session could not be re-established")
                .into_response();
        }
        Err(e) => {
            guard.finish().await;
            return RelayError::UpstreamError
                .to_http_response(format!("upstream chat call failed: {e}"))
                .into_response();
        }
    };

    if req.stream {
        stream_response(&s, upstream, guard, alias, response_id).into_response()
    } else {
        aggregate_response(upstream, guard, alias, response_id).await.into_response()
    }
}

/// Build the upstream chat payload for one request.
fn chat_payload(
    config: &RelayConfig,
    upstream_model: &str,
    system_prompt: &str,
    prompt: &str,
    chat_id: &str,
) -> serde_json::Value {
    let message_id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(16).collect();
    let created_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    let mut settings = serde_json::json!({
        "modelId": upstream_model,
        "customSystemPrompt": system_prompt,
    });
    if models::reasoning_enabled(upstream_model, &config.reasoning_patterns()) {
        settings["reasoning"] = serde_json::Value::String("on".to_owned());
    }

    serde_json::json!({
        "message": {
            "id": message_id,
            "createdAt": created_at,
            "role": "user",
            "content": prompt,
            "parts": [{ "type": "text", "text": prompt }],
        },
        "cornerType": CORNER_TYPE,
        "chatId": chat_id,
        "settings": settings,
    })
}

/// Non-streaming path: read the whole upstream body, aggregate content and
/// reasoning separately, archive the conversation.
async fn aggregate_response(
    upstream: reqwest::Response,
    guard: ConversationGuard,
    model: String,
    response_id: String,
) -> axum::response::Response {
    let body = match upstream.text().await {
        Ok(body) => body,
        Err(e) => {
            guard.finish().await;
            return RelayError::UpstreamError
                .to_http_response(format!("failed to read upstream response: {e}"))
                .into_response();
        }
    };

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut usage = Usage::default();
    for line in body.lines() {
        match crate::upstream::stream::parse_line(line) {
            Some(TranslatedEvent::ContentDelta(text)) => content.push_str(&text),
            Some(TranslatedEvent::ReasoningDelta(text)) => reasoning.push_str(&text),
            Some(TranslatedEvent::Done { usage: counts }) => {
                usage = counts.unwrap_or_default();
                break;
            }
            _ => {}
        }
    }

    guard.finish().await;

    let completion = ChatCompletion {
        id: response_id,
        object: "chat.completion",
        created: epoch_secs(),
        model,
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant",
                content,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason: "stop",
        }],
        usage,
    };
    Json(completion).into_response()
}

/// Streaming path: translator events re-encoded as OpenAI SSE chunks.
///
/// The consumer task owns the conversation guard: normal completion and
/// upstream errors archive via `finish()`, a vanished client (send failure)
/// cancels the producers and lets the guard's `Drop` archive.
fn stream_response(
    s: &Arc<RelayState>,
    upstream: reqwest::Response,
    guard: ConversationGuard,
    model: String,
    response_id: String,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let cancel = s.shutdown.child_token();
    let source = Box::pin(upstream.bytes_stream().map_err(std::io::Error::other));
    let mut events = spawn_translator(source, s.config.heartbeat_interval(), cancel.clone());

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);
    let created = epoch_secs();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let ends_stream = matches!(
                event,
                TranslatedEvent::Done { .. } | TranslatedEvent::Error(_)
            );
            for frame in encode_sse(event, &response_id, created, &model) {
                if tx.send(Ok(frame)).await.is_err() {
                    tracing::debug!(id = %response_id, "client disconnected mid-stream");
                    cancel.cancel();
                    // Guard dropped here: its Drop archives the conversation.
                    return;
                }
            }
            if ends_stream {
                break;
            }
        }
        guard.finish().await;
        cancel.cancel();
    });

    Sse::new(ReceiverStream::new(rx))
}

/// Encode one translated event as zero or more SSE frames.
fn encode_sse(event: TranslatedEvent, id: &str, created: u64, model: &str) -> Vec<Event> {
    match event {
        TranslatedEvent::ContentDelta(text) => {
            vec![chunk(id, created, model, serde_json::json!({ "content": text }), None)]
        }
        TranslatedEvent::ReasoningDelta(text) => {
            vec![chunk(id, created, model, serde_json::json!({ "reasoning_content": text }), None)]
        }
        TranslatedEvent::Heartbeat => vec![Event::default().comment("heartbeat")],
        TranslatedEvent::Done { usage } => {
            let mut done = serde_json::json!({
                "id": id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{ "delta": {}, "index": 0, "finish_reason": "stop" }],
            });
            if let Some(usage) = usage {
                done["usage"] = serde_json::json!(usage);
            }
            vec![Event::default().data(done.to_string()), Event::default().data("[DONE]")]
        }
        TranslatedEvent::Error(message) => {
            let body = crate::error::ErrorResponse {
                error: RelayError::UpstreamError.to_error_body(message),
            };
            let data = serde_json::to_string(&body)
                .unwrap_or_else(|_| r#"{"error":{"message":"stream error"}}"#.to_owned());
            vec![Event::default().data(data)]
        }
    }
}

fn chunk(
    id: &str,
    created: u64,
    model: &str,
    delta: serde_json::Value,
    finish_reason: Option<&str>,
) -> Event {
    let data = serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "delta": delta, "index": 0, "finish_reason": finish_reason }],
    });
    Event::default().data(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta_encodes_as_chunk() {
        let frames = encode_sse(
            TranslatedEvent::ContentDelta("hi".into()),
            "chatcmpl-x",
            1,
            "gpt-4o",
        );
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn done_emits_finish_chunk_and_done_marker() {
        let frames =
            encode_sse(TranslatedEvent::Done { usage: None }, "chatcmpl-x", 1, "gpt-4o");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn payload_sets_reasoning_only_for_configured_models() {
        let config = crate::test_support::test_config("http://upstream");
        let with = chat_payload(&config, "claude-4-opus-20250514", "", "Assistant:", "c1");
        assert_eq!(with["settings"]["reasoning"], "on");

        let without = chat_payload(&config, "gpt-4o", "", "Assistant:", "c1");
        assert!(without["settings"].get("reasoning").is_none());
    }

    #[test]
    fn payload_carries_prompt_and_system_prompt() {
        let config = crate::test_support::test_config("http://upstream");
        let payload =
            chat_payload(&config, "gpt-4o", "be terse", "Human: hi\n\nAssistant:", "conv-1");
        assert_eq!(payload["chatId"], "conv-1");
        assert_eq!(payload["cornerType"], "text");
        assert_eq!(payload["settings"]["customSystemPrompt"], "be terse");
        assert_eq!(payload["message"]["content"], "Human: hi\n\nAssistant:");
        assert_eq!(payload["message"]["parts"][0]["text"], "Human: hi\n\nAssistant:");
    }
}
