// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream translator: turns the upstream's line-tagged chat protocol into an
//! ordered sequence of [`TranslatedEvent`]s.
//!
//! Each upstream line carries a two-character prefix: `0:` content delta,
//! `g:` reasoning delta, `e:`/`d:` terminal (optionally with usage counts).
//! Unknown prefixes and unparseable payloads are logged and skipped; they
//! never abort the stream.
//!
//! The upstream reader and a heartbeat ticker run as independent producer
//! tasks feeding one bounded channel, so a silent upstream cannot starve the
//! downstream consumer and a gone consumer tears both producers down.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// One normalized unit of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatedEvent {
    ContentDelta(String),
    ReasoningDelta(String),
    Heartbeat,
    Done { usage: Option<Usage> },
    Error(String),
}

/// Token counts in the OpenAI wire shape. Zero-valued unless the upstream
/// supplied real numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Parse one upstream line. `None` means "nothing to emit" (unknown prefix,
/// bad payload, blank line); the caller keeps reading.
pub fn parse_line(line: &str) -> Option<TranslatedEvent> {
    if let Some(payload) = line.strip_prefix("0:") {
        match serde_json::from_str::<String>(payload) {
            Ok(text) => Some(TranslatedEvent::ContentDelta(text)),
            Err(e) => {
                tracing::debug!(err = %e, "skipping malformed content line");
                None
            }
        }
    } else if let Some(payload) = line.strip_prefix("g:") {
        match serde_json::from_str::<String>(payload) {
            Ok(text) => Some(TranslatedEvent::ReasoningDelta(text)),
            Err(e) => {
                tracing::debug!(err = %e, "skipping malformed reasoning line");
                None
            }
        }
    } else if let Some(payload) =
        line.strip_prefix("e:").or_else(|| line.strip_prefix("d:"))
    {
        // The terminal tag itself ends the stream even when its usage payload
        // does not parse.
        let usage = serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|v| parse_usage(&v));
        Some(TranslatedEvent::Done { usage })
    } else {
        if !line.trim().is_empty() {
            let prefix: String = line.chars().take(2).collect();
            tracing::debug!(%prefix, "skipping line with unrecognized prefix");
        }
        None
    }
}

fn parse_usage(value: &serde_json::Value) -> Option<Usage> {
    let usage = value.get("usage")?.as_object()?;
    let prompt_tokens = usage.get("promptTokens").and_then(serde_json::Value::as_u64).unwrap_or(0);
    let completion_tokens =
        usage.get("completionTokens").and_then(serde_json::Value::as_u64).unwrap_or(0);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    })
}

/// Spawn the translator's producer tasks over a live upstream byte stream.
///
/// Emits at most one `Done`: from the upstream's terminal tag, or synthesized
/// on clean source exhaustion. A read error emits `Error` instead and stops.
/// Cancelling `cancel` (or dropping the receiver) tears down both producers.
pub fn spawn_translator<S>(
    source: S,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<TranslatedEvent>
where
    S: Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    // Child token cancelled by the reader on exit so the heartbeat stops with it.
    let stream_over = cancel.child_token();

    {
        let tx = tx.clone();
        let stop = stream_over.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; the first heartbeat should wait a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(TranslatedEvent::Heartbeat).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut lines = FramedRead::new(StreamReader::new(source), LinesCodec::new());
        let mut finished = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    finished = true; // no synthesized Done after cancellation
                    break;
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        let Some(event) = parse_line(&line) else {
                            continue;
                        };
                        let is_done = matches!(event, TranslatedEvent::Done { .. });
                        if tx.send(event).await.is_err() {
                            // Consumer is gone; stop reading.
                            finished = true;
                            break;
                        }
                        if is_done {
                            finished = true;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "upstream stream read error");
                        let _ = tx
                            .send(TranslatedEvent::Error(format!("upstream stream error: {e}")))
                            .await;
                        finished = true;
                        break;
                    }
                    None => break,
                }
            }
        }

        if !finished {
            let _ = tx.send(TranslatedEvent::Done { usage: None }).await;
        }
        stream_over.cancel();
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn line_source(lines: &[&str]) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin {
        let joined = lines.join("\n") + "\n";
        stream::iter(vec![Ok(bytes::Bytes::from(joined))])
    }

    async fn collect(mut rx: mpsc::Receiver<TranslatedEvent>) -> Vec<TranslatedEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            let is_done = matches!(ev, TranslatedEvent::Done { .. });
            events.push(ev);
            if is_done {
                break;
            }
        }
        events
    }

    #[test]
    fn parse_line_content_and_reasoning() {
        assert_eq!(
            parse_line(r#"0:"hello""#),
            Some(TranslatedEvent::ContentDelta("hello".into()))
        );
        assert_eq!(
            parse_line(r#"g:"thinking""#),
            Some(TranslatedEvent::ReasoningDelta("thinking".into()))
        );
    }

    #[test]
    fn parse_line_unknown_prefix_is_skipped() {
        assert_eq!(parse_line("x:whatever"), None);
        assert_eq!(parse_line("2:[1,2,3]"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("9"), None);
    }

    #[test]
    fn parse_line_bad_payload_is_skipped() {
        assert_eq!(parse_line("0:not json"), None);
        assert_eq!(parse_line("g:{\"oops\":1}"), None);
    }

    #[test]
    fn parse_line_terminal_with_usage() {
        let ev = parse_line(r#"e:{"finishReason":"stop","usage":{"promptTokens":7,"completionTokens":11}}"#);
        assert_eq!(
            ev,
            Some(TranslatedEvent::Done {
                usage: Some(Usage { prompt_tokens: 7, completion_tokens: 11, total_tokens: 18 })
            })
        );
    }

    #[test]
    fn parse_line_terminal_without_usage_still_ends() {
        assert_eq!(parse_line("d:garbage"), Some(TranslatedEvent::Done { usage: None }));
        assert_eq!(parse_line("e:{}"), Some(TranslatedEvent::Done { usage: None }));
    }

    #[tokio::test]
    async fn translator_preserves_relative_order() {
        let source = line_source(&[
            r#"0:"a""#,
            r#"g:"r1""#,
            r#"0:"b""#,
            "x:ignored",
            r#"g:"r2""#,
            r#"0:"c""#,
            r#"e:{"usage":{"promptTokens":1,"completionTokens":2}}"#,
        ]);
        let rx = spawn_translator(source, Duration::from_secs(3600), CancellationToken::new());
        let events = collect(rx).await;

        let content: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TranslatedEvent::ContentDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        let reasoning: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TranslatedEvent::ReasoningDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(content, ["a", "b", "c"]);
        assert_eq!(reasoning, ["r1", "r2"]);

        let done_count = events
            .iter()
            .filter(|e| matches!(e, TranslatedEvent::Done { .. }))
            .count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn translator_synthesizes_done_on_exhaustion() {
        let source = line_source(&[r#"0:"only""#]);
        let rx = spawn_translator(source, Duration::from_secs(3600), CancellationToken::new());
        let events = collect(rx).await;
        assert_eq!(events.last(), Some(&TranslatedEvent::Done { usage: None }));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_while_upstream_is_idle() {
        let source = stream::pending::<Result<bytes::Bytes, std::io::Error>>();
        let cancel = CancellationToken::new();
        let mut rx = spawn_translator(Box::pin(source), Duration::from_secs(15), cancel.clone());

        assert_eq!(rx.recv().await, Some(TranslatedEvent::Heartbeat));
        assert_eq!(rx.recv().await, Some(TranslatedEvent::Heartbeat));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_tears_down_without_done() {
        let source = stream::pending::<Result<bytes::Bytes, std::io::Error>>();
        let cancel = CancellationToken::new();
        let mut rx = spawn_translator(Box::pin(source), Duration::from_secs(3600), cancel.clone());

        cancel.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
