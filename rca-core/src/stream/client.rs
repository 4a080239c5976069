//! Client side of a stream connection.
//!
//! Sends viewport and interaction calls to a server's registry and
//! receives the frames it publishes. Delivery statistics are published
//! on a `tokio::sync::watch` channel so a display can poll them without
//! touching the receive path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RcaError;
use crate::message::{Message, RpcMethod, STREAM_TOPIC, attachment_ref, parse_attachment_ref};
use crate::network::{Connection, ConnectionInfo, ConnectionSender};
use crate::packet::Packet;
use crate::stream::input::{InteractionEvent, SizeSpec};
use crate::stream::stats::{FrameStats, ThroughputEstimator};
use crate::stream::throttle::{DEFAULT_THROTTLE_PERIOD, EventThrottle};
use crate::stream::types::{FrameMetadata, now_ms};

/// Frames buffered for the consumer before new ones are dropped.
pub const FRAME_QUEUE_DEPTH: usize = 64;

type ReplySlot = oneshot::Sender<Result<Value, RcaError>>;

/// Outstanding calls by id; `None` once the connection is gone.
type PendingCalls = Arc<Mutex<Option<HashMap<u64, ReplySlot>>>>;

// ── StreamFrame ──────────────────────────────────────────────────

/// One published frame.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Area the frame belongs to.
    pub name: String,
    pub meta: FrameMetadata,
    /// Encoded image bytes.
    pub content: Bytes,
}

#[derive(Deserialize)]
struct PublishedFrame {
    name: String,
    meta: FrameMetadata,
    content: String,
}

// ── StreamClient ─────────────────────────────────────────────────

pub struct StreamClient {
    caller: Arc<Caller>,
    frames: mpsc::Receiver<StreamFrame>,
    stats_rx: watch::Receiver<FrameStats>,
    reader: JoinHandle<()>,
}

/// Request side of the connection, shared with event throttles.
struct Caller {
    outbound: ConnectionSender,
    pending: PendingCalls,
    next_id: AtomicU64,
}

impl Caller {
    async fn call(&self, method: RpcMethod, args: Vec<Value>, attachments: Vec<Bytes>) -> Result<Value, RcaError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(calls) => calls.insert(id, tx),
            None => return Err(RcaError::ChannelClosed),
        };

        let packet = Packet::with_attachments(Message::call(id, method, args), attachments);
        if let Err(e) = self.outbound.send(packet).await {
            if let Some(calls) = lock(&self.pending).as_mut() {
                calls.remove(&id);
            }
            return Err(e.into());
        }
        rx.await.map_err(|_| RcaError::ChannelClosed)?
    }

    async fn send_event(&self, area: &str, origin: &str, event: &InteractionEvent) -> Result<(), RcaError> {
        self.call(RpcMethod::Event, vec![json!(area), json!(origin), serde_json::to_value(event)?], Vec::new())
            .await
            .map(drop)
    }
}

impl StreamClient {
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, RcaError> {
        Ok(Self::new(Connection::connect(info).await?))
    }

    /// Wrap an established connection and start the receive task.
    pub fn new(connection: Connection) -> Self {
        let (outbound, inbound) = connection.into_split();
        let pending: PendingCalls = Arc::new(Mutex::new(Some(HashMap::new())));
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (stats_tx, stats_rx) = watch::channel(FrameStats::default());

        let reader = tokio::spawn(receive_loop(inbound, Arc::clone(&pending), frame_tx, stats_tx));

        Self {
            caller: Arc::new(Caller {
                outbound,
                pending,
                next_id: AtomicU64::new(1),
            }),
            frames: frame_rx,
            stats_rx,
            reader,
        }
    }

    /// Invoke `method` on the server and wait for its reply.
    pub async fn call(
        &self,
        method: RpcMethod,
        args: Vec<Value>,
        attachments: Vec<Bytes>,
    ) -> Result<Value, RcaError> {
        self.caller.call(method, args, attachments).await
    }

    pub async fn update_size(&self, area: &str, origin: &str, size: SizeSpec) -> Result<(), RcaError> {
        self.call(RpcMethod::Size, vec![json!(area), json!(origin), serde_json::to_value(size)?], Vec::new())
            .await
            .map(drop)
    }

    /// Send one event right away. Pointer streams should go through
    /// [`event_throttle`](Self::event_throttle) instead.
    pub async fn send_event(
        &self,
        area: &str,
        origin: &str,
        event: &InteractionEvent,
    ) -> Result<(), RcaError> {
        self.caller.send_event(area, origin, event).await
    }

    /// A throttle delivering events for `area` at most once per
    /// [`DEFAULT_THROTTLE_PERIOD`].
    pub fn event_throttle(&self, area: &str, origin: &str) -> EventThrottle {
        self.event_throttle_with_period(area, origin, DEFAULT_THROTTLE_PERIOD)
    }

    pub fn event_throttle_with_period(&self, area: &str, origin: &str, period: Duration) -> EventThrottle {
        let caller = Arc::clone(&self.caller);
        let area = Arc::<str>::from(area);
        let origin = Arc::<str>::from(origin);
        EventThrottle::new(period, move |event| {
            let caller = Arc::clone(&caller);
            let area = Arc::clone(&area);
            let origin = Arc::clone(&origin);
            async move { caller.send_event(&area, &origin, &event).await }
        })
    }

    /// Ask the server to publish `content` as a frame of `area`.
    pub async fn push(&self, area: &str, meta: &FrameMetadata, content: Bytes) -> Result<(), RcaError> {
        let args = vec![json!(area), serde_json::to_value(meta)?, json!(attachment_ref(0))];
        self.call(RpcMethod::Push, args, vec![content]).await.map(drop)
    }

    /// Received frames, oldest first.
    pub fn frames(&mut self) -> &mut mpsc::Receiver<StreamFrame> {
        &mut self.frames
    }

    /// Next frame, or `None` once `timeout` elapses or the connection ends.
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<StreamFrame> {
        tokio::time::timeout(timeout, self.frames.recv()).await.ok().flatten()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<FrameStats> {
        self.stats_rx.clone()
    }

    pub fn stats(&self) -> FrameStats {
        *self.stats_rx.borrow()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock(pending: &PendingCalls) -> std::sync::MutexGuard<'_, Option<HashMap<u64, ReplySlot>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Receive loop ─────────────────────────────────────────────────

async fn receive_loop(
    mut inbound: mpsc::Receiver<Packet>,
    pending: PendingCalls,
    frames: mpsc::Sender<StreamFrame>,
    stats: watch::Sender<FrameStats>,
) {
    let mut estimator = ThroughputEstimator::new();

    while let Some(packet) = inbound.recv().await {
        let (message, attachments) = packet.into_parts();
        match message {
            Message::Result { id, result } => resolve(&pending, id, Ok(result)),
            Message::Error { id, error } => resolve(&pending, id, Err(RcaError::Other(error))),
            Message::Publish { topic, data } if topic == STREAM_TOPIC => {
                let frame = match decode_frame(data, &attachments) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("malformed frame publish: {e}");
                        continue;
                    }
                };

                estimator.record(frame.content.len() as u64);
                estimator.record_delay(Duration::from_millis(now_ms().saturating_sub(frame.meta.st)));
                let _ = stats.send(estimator.snapshot(frame.meta.w, frame.meta.h));

                if frames.try_send(frame).is_err() {
                    debug!("frame queue full; frame dropped");
                }
            }
            other => debug!(kind = other.kind(), "ignoring inbound message"),
        }
    }

    // Connection gone: fail every outstanding call.
    *lock(&pending) = None;
    debug!("stream client receive loop stopped");
}

fn resolve(pending: &PendingCalls, id: u64, outcome: Result<Value, RcaError>) {
    let slot = lock(pending).as_mut().and_then(|calls| calls.remove(&id));
    match slot {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!(id, "reply for unknown call"),
    }
}

fn decode_frame(data: Value, attachments: &[Bytes]) -> Result<StreamFrame, RcaError> {
    let published: PublishedFrame = serde_json::from_value(data)?;
    let index = parse_attachment_ref(&published.content).ok_or_else(|| {
        RcaError::InvalidArgument(format!("bad attachment reference {}", published.content))
    })?;
    let content = attachments
        .get(index)
        .cloned()
        .ok_or_else(|| RcaError::InvalidArgument(format!("missing attachment {index}")))?;
    Ok(StreamFrame {
        name: published.name,
        meta: published.meta,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Server stand-in answering every call with `null` and echoing pushes
    /// back as publishes.
    fn echo_server(connection: Connection) {
        tokio::spawn(async move {
            let (tx, mut rx) = connection.into_split();
            while let Some(packet) = rx.recv().await {
                let (message, attachments) = packet.into_parts();
                let Message::Call { id, method, args } = message else {
                    continue;
                };
                if method == "rca.push" {
                    let data = json!({"name": args[0], "meta": args[1], "content": "rca.bin.0"});
                    let publish = Message::Publish {
                        topic: STREAM_TOPIC.into(),
                        data,
                    };
                    let _ = tx.send(Packet::with_attachments(publish, attachments)).await;
                }
                let reply = Message::Result { id, result: Value::Null };
                let _ = tx.send(Packet::new(reply)).await;
            }
        });
    }

    fn pair() -> StreamClient {
        let (a, b) = tokio::io::duplex(1 << 16);
        echo_server(Connection::new(b));
        StreamClient::new(Connection::new(a))
    }

    #[tokio::test]
    async fn calls_resolve_by_id() {
        let client = pair();
        client.update_size("view", "o", SizeSpec::default()).await.unwrap();
        client
            .send_event("view", "o", &InteractionEvent::new("MouseMove"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pushed_frames_come_back_with_stats() {
        let mut client = pair();
        let meta = FrameMetadata::new("image/png", 32, 24, now_ms(), 90);
        client
            .push("remote", &meta, Bytes::from_static(b"pixels"))
            .await
            .unwrap();

        let frame = client.next_frame(Duration::from_secs(2)).await.unwrap();
        assert_eq!(frame.name, "remote");
        assert_eq!(frame.meta, meta);
        assert_eq!(frame.content, Bytes::from_static(b"pixels"));

        let stats = client.stats();
        assert_eq!(stats.total_frames, 1);
        assert_eq!(stats.total_bytes, 6);
        assert_eq!((stats.width, stats.height), (32, 24));
    }

    #[tokio::test]
    async fn throttled_events_reach_the_server_compressed() {
        let (a, b) = tokio::io::duplex(1 << 16);
        let client = StreamClient::new(Connection::new(a));
        let (tx, mut rx) = Connection::new(b).into_split();
        let server = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(packet) = rx.recv().await {
                let Message::Call { id, args, .. } = packet.message().clone() else {
                    continue;
                };
                events.push(args[2]["x"].clone());
                let _ = tx.send(Packet::new(Message::Result { id, result: Value::Null })).await;
                if events.len() == 2 {
                    break;
                }
            }
            events
        });

        let throttle = client.event_throttle_with_period("view", "o", Duration::from_millis(30));
        for x in 0..5 {
            throttle.send_event(InteractionEvent::new("MouseMove").with("x", x).with("y", 0));
        }

        let events = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events, vec![json!(0), json!(4)]);
    }

    #[tokio::test]
    async fn pending_calls_fail_when_connection_drops() {
        let (a, b) = tokio::io::duplex(1024);
        let client = StreamClient::new(Connection::new(a));
        drop(b);

        let err = client
            .call(RpcMethod::Size, vec![json!("view")], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RcaError::ChannelClosed));
    }

    #[test]
    fn frame_decoding_requires_attachment() {
        let data = json!({
            "name": "view",
            "meta": FrameMetadata::new("image/jpeg", 1, 1, 1, 1),
            "content": "rca.bin.3",
        });
        assert!(matches!(
            decode_frame(data, &[]),
            Err(RcaError::InvalidArgument(_))
        ));
    }
}
