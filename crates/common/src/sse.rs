// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 WireGuard Tunnel Manager Contributors

//! Server-Sent Events client for session updates
//!
//! [`EventStream`] reads one connection to `/api/events`. [`EventListener`]
//! keeps a stream open across daemon restarts and forwards events to a
//! channel.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Response;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::daemon_client::{DaemonClient, DaemonClientConfig};
use crate::types::SessionEvent;

/// Incremental decoder for `text/event-stream` bodies
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body, returning every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SessionEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }

            // Comments and keep-alives
            if line.starts_with(':') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SessionEvent> {
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data);
        match serde_json::from_str::<SessionEvent>(&data) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Failed to parse SSE event: {} (error: {})", data, e);
                None
            }
        }
    }
}

/// One open connection to the daemon's event stream
pub struct EventStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    ready: VecDeque<SessionEvent>,
}

impl EventStream {
    pub(crate) fn new(response: Response) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Self {
            body,
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next event, or `None` once the daemon closes the stream
    pub async fn next_event(&mut self) -> Option<Result<SessionEvent>> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }

            match self.body.next().await? {
                Ok(bytes) => self.ready.extend(self.decoder.push(&bytes)),
                Err(e) => return Some(Err(e).context("Error reading event stream")),
            }
        }
    }
}

/// Event listener that reconnects when the stream drops
pub struct EventListener {
    config: DaemonClientConfig,
}

impl EventListener {
    pub fn new(config: DaemonClientConfig) -> Self {
        Self { config }
    }

    /// Start listening to daemon events
    ///
    /// Reconnects with exponential backoff (1s up to 30s) until the
    /// receiver is dropped.
    pub fn listen(&self) -> Result<mpsc::Receiver<SessionEvent>> {
        let client = DaemonClient::new(self.config.clone())?;
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            let max_backoff = Duration::from_secs(30);

            loop {
                match client.events().await {
                    Ok(mut stream) => {
                        backoff = Duration::from_secs(1);
                        while let Some(event) = stream.next_event().await {
                            match event {
                                Ok(event) => {
                                    if tx.send(event).await.is_err() {
                                        tracing::debug!("Receiver dropped, stopping event listener");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("{:#}", e);
                                    break;
                                }
                            }
                        }
                        tracing::debug!("Event stream closed");
                    }
                    Err(e) => tracing::warn!("Event stream error: {:#}", e),
                }

                if tx.is_closed() {
                    break;
                }

                sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        });

        Ok(rx)
    }
}

impl Default for EventListener {
    fn default() -> Self {
        Self::new(DaemonClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IgnoreReason;

    #[test]
    fn test_decodes_complete_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"intent_ignored\",\"reason\":\"nothing_selected\"}\n\n",
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SessionEvent::IntentIgnored {
                reason: IgnoreReason::NothingSelected
            }
        ));
    }

    #[test]
    fn test_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"poll_fa").is_empty());
        assert!(decoder
            .push(b"iled\",\"diagnostic\":\"timed out\",\"consecutive\":2}\r\n")
            .is_empty());
        let events = decoder.push(b"\r\n");
        assert!(matches!(
            &events[0],
            SessionEvent::PollFailed { consecutive: 2, .. }
        ));
    }

    #[test]
    fn test_skips_comments_and_bad_json() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nevent: message\ndata: not json\n\n");
        assert!(events.is_empty());

        let events = decoder.push(
            b"data: {\"type\":\"heartbeat\",\"timestamp\":\"2025-01-01T00:00:00Z\"}\n\n",
        );
        assert!(matches!(events[0], SessionEvent::Heartbeat { .. }));
    }
}
