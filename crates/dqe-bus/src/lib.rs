//! Live Progress Bus — per-`run_id` fan-out of [`ProgressEvent`]s to N
//! subscribers (§4.J).
//!
//! One `tokio::sync::broadcast` channel per run, not one global channel
//! filtered by run_id: that keeps the drop-policy accounting and the
//! "no cross-run ordering guarantee" true by construction rather than by
//! convention. Channels are registered in a shared
//! `RwLock<HashMap<Uuid, Sender<ProgressEvent>>>`, matching the teacher's
//! `AppState`/`BusMsg` shape but keyed per-run instead of process-global.
//!
//! This crate ships the subscription primitive and the SSE wire-format
//! encoder (§6) — a pure `ProgressEvent -> String` function any transport
//! can sit on top of. It does not stand up an HTTP server: the HTTP
//! surface is an explicit non-goal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dqe_schemas::{ProgressEvent, ProgressEventType};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// Bounded per-run channel capacity. A subscriber slower than this many
/// events behind has the oldest ones dropped rather than ever blocking the
/// orchestrator's publish call.
const CHANNEL_CAPACITY: usize = 256;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct RunChannel {
    sender: broadcast::Sender<ProgressEvent>,
}

/// Per-run fan-out registry. Cheaply `Clone`-able (wraps an `Arc`); share
/// one instance across the orchestrator and whatever subscribes to it.
#[derive(Clone)]
pub struct ProgressBus {
    channels: Arc<RwLock<HashMap<Uuid, RunChannel>>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender_for(&self, run_id: Uuid) -> broadcast::Sender<ProgressEvent> {
        if let Some(ch) = self.channels.read().await.get(&run_id) {
            return ch.sender.clone();
        }
        let mut write = self.channels.write().await;
        // Re-check under the write lock: another task may have raced us here.
        if let Some(ch) = write.get(&run_id) {
            return ch.sender.clone();
        }
        let (sender, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        write.insert(
            run_id,
            RunChannel {
                sender: sender.clone(),
            },
        );
        sender
    }

    /// Publish one event for `run_id`. Never blocks on a subscriber: if
    /// nobody is listening the send is a (logged, harmless) no-op.
    pub async fn publish(&self, event: ProgressEvent) {
        let sender = self.sender_for(event.run_id).await;
        // `send` only errs when there are zero receivers, which is
        // expected and not a failure — the run continues regardless of
        // whether anyone is watching.
        let _ = sender.send(event);
    }

    pub async fn publish_kind(&self, run_id: Uuid, event_type: ProgressEventType, payload: Value) {
        self.publish(ProgressEvent {
            run_id,
            event_type,
            timestamp: Utc::now(),
            payload,
        })
        .await;
    }

    /// Subscribe to `run_id`'s event stream. `snapshot` is sent first, as
    /// the spec requires ("on subscribe, the bus first sends the current
    /// `run_state`"), then every subsequent event for this run in
    /// orchestrator-emission order. Lag (the subscriber falling behind the
    /// bounded channel) is logged and skipped rather than surfaced as an
    /// error — drops never propagate back to the caller.
    pub async fn subscribe(
        &self,
        run_id: Uuid,
        snapshot: ProgressEvent,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let sender = self.sender_for(run_id).await;
        let rx = sender.subscribe();
        let live = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(run_id = %run_id, skipped, "progress subscriber lagged; events dropped");
                None
            }
        });
        tokio_stream::once(snapshot).chain(live)
    }

    /// Drop the channel for a finished run so the registry doesn't grow
    /// without bound across a long-lived process. Safe to call even if no
    /// channel was ever created.
    pub async fn close(&self, run_id: Uuid) {
        self.channels.write().await.remove(&run_id);
    }

    /// Spawn a background task that emits a `heartbeat` event for `run_id`
    /// every [`HEARTBEAT_INTERVAL`] until the returned handle is aborted.
    /// The orchestrator owns the handle and aborts it at `run_completed`.
    pub fn spawn_heartbeat(&self, run_id: Uuid) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                bus.publish_kind(
                    run_id,
                    ProgressEventType::Heartbeat,
                    serde_json::json!({ "ts_millis": Utc::now().timestamp_millis() }),
                )
                .await;
            }
        })
    }
}

/// Encode one event into the SSE wire format from §6: `event: <type>`
/// followed by a single `data: <json>` line and a blank-line terminator.
/// Pure function — any transport (including one this repository does not
/// build) can reuse it verbatim.
pub fn encode_sse(event: &ProgressEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event.event_type.wire_name(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqe_schemas::ProgressEventType;
    use futures_util::StreamExt as _;
    use serde_json::json;

    fn snapshot(run_id: Uuid) -> ProgressEvent {
        ProgressEvent {
            run_id,
            event_type: ProgressEventType::RunState,
            timestamp: Utc::now(),
            payload: json!({ "status": "running" }),
        }
    }

    #[tokio::test]
    async fn subscriber_sees_snapshot_first_then_published_events() {
        let bus = ProgressBus::new();
        let run_id = Uuid::new_v4();
        let mut stream = Box::pin(bus.subscribe(run_id, snapshot(run_id)).await);

        bus.publish_kind(run_id, ProgressEventType::TestResult, json!({"name": "t1"}))
            .await;

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::RunState);

        let second = stream.next().await.unwrap();
        assert_eq!(second.event_type, ProgressEventType::TestResult);
    }

    #[tokio::test]
    async fn events_for_different_runs_do_not_cross_streams() {
        let bus = ProgressBus::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        let mut stream_a = Box::pin(bus.subscribe(run_a, snapshot(run_a)).await);
        bus.publish_kind(run_b, ProgressEventType::Heartbeat, json!({})).await;
        bus.publish_kind(run_a, ProgressEventType::RunCompleted, json!({})).await;

        let first = stream_a.next().await.unwrap();
        assert_eq!(first.event_type, ProgressEventType::RunState);
        let second = stream_a.next().await.unwrap();
        assert_eq!(second.event_type, ProgressEventType::RunCompleted);
        assert_eq!(second.run_id, run_a);
    }

    #[test]
    fn sse_encoding_matches_wire_format() {
        let event = snapshot(Uuid::nil());
        let encoded = encode_sse(&event);
        assert!(encoded.starts_with("event: run_state\n"));
        assert!(encoded.contains("data: "));
        assert!(encoded.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn publishing_with_no_subscriber_is_a_harmless_no_op() {
        let bus = ProgressBus::new();
        bus.publish_kind(Uuid::new_v4(), ProgressEventType::Heartbeat, json!({}))
            .await;
    }

    #[tokio::test]
    async fn close_removes_the_channel() {
        let bus = ProgressBus::new();
        let run_id = Uuid::new_v4();
        let _ = bus.sender_for(run_id).await;
        assert!(bus.channels.read().await.contains_key(&run_id));
        bus.close(run_id).await;
        assert!(!bus.channels.read().await.contains_key(&run_id));
    }
}
