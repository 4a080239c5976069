//! Per-connection area registry and RPC relay.
//!
//! # Wire Protocol
//!
//! ## Resize
//! ```text
//! Client ──[call rca.size(area, origin, {w, h, p})]──► Server
//! Server ──[result null]─────────────────────────────► Client
//! ```
//!
//! ## Interaction
//! ```text
//! Client ──[call rca.event(area, origin, {type, ...})]──► Server
//! Server ──[result null]────────────────────────────────► Client
//! ```
//!
//! ## Frames (continuous)
//! ```text
//! Server ──[publish rca.topic.stream]──► Client   (repeated)
//!   data: {name, meta, content: "rca.bin.0"}
//!   attachment 0: encoded image
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::RcaError;
use crate::message::{Message, RpcMethod, STREAM_TOPIC, attachment_ref, parse_attachment_ref};
use crate::network::ConnectionSender;
use crate::packet::Packet;
use crate::stream::input::{InteractionEvent, SizeSpec};
use crate::stream::types::FrameMetadata;

// ── Traits ───────────────────────────────────────────────────────

/// Outbound sink for the frames of registered areas.
pub trait Streamer: Send + Sync {
    fn push_content(&self, area: &str, meta: FrameMetadata, content: Bytes);
}

/// A named render area that can be attached to a registry.
pub trait AreaHandler: Send + Sync {
    fn area_name(&self) -> &str;

    /// Attach (`Some`) or detach (`None`) the outbound streamer.
    fn set_streamer(&self, streamer: Option<Weak<dyn Streamer>>);

    /// May block on the area's frame source; [`StreamRegistry::serve`]
    /// calls it from the blocking pool.
    fn update_size(&self, origin: &str, size: SizeSpec) -> Result<(), RcaError>;

    /// Same blocking caveat as [`update_size`](Self::update_size).
    fn on_interaction(&self, origin: &str, event: InteractionEvent) -> Result<(), RcaError>;

    /// Release the area's resources. Called once the area leaves the registry
    /// for good.
    fn close(&self) -> BoxFuture<'_, ()>;
}

// ── StreamRegistry ───────────────────────────────────────────────

/// Table of areas sharing one client connection.
pub struct StreamRegistry {
    areas: RwLock<HashMap<String, Arc<dyn AreaHandler>>>,
    outbound: ConnectionSender,
}

impl StreamRegistry {
    pub fn new(outbound: ConnectionSender) -> Arc<Self> {
        Arc::new(Self {
            areas: RwLock::new(HashMap::new()),
            outbound,
        })
    }

    /// Register `handler` under its area name, replacing and detaching any
    /// previous handler of that name.
    pub fn register_area(self: &Arc<Self>, handler: Arc<dyn AreaHandler>) {
        let name = handler.area_name().to_string();
        let streamer: Weak<dyn Streamer> = Arc::downgrade(self) as Weak<StreamRegistry>;
        handler.set_streamer(Some(streamer));

        let previous = self.write_areas().insert(name.clone(), handler);
        if let Some(previous) = previous {
            previous.set_streamer(None);
            debug!(area = %name, "replaced area handler");
        }
        info!(area = %name, "area registered");
    }

    /// Remove and detach the area called `name`.
    pub fn unregister_area(&self, name: &str) -> Result<Arc<dyn AreaHandler>, RcaError> {
        let handler = self
            .write_areas()
            .remove(name)
            .ok_or_else(|| RcaError::UnknownArea(name.to_string()))?;
        handler.set_streamer(None);
        info!(area = %name, "area unregistered");
        Ok(handler)
    }

    pub fn area(&self, name: &str) -> Option<Arc<dyn AreaHandler>> {
        self.read_areas().get(name).cloned()
    }

    pub fn area_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_areas().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read_areas().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_areas().is_empty()
    }

    /// Forward a viewport change. Unknown areas are logged and ignored.
    pub fn update_size(&self, area: &str, origin: &str, size: SizeSpec) -> Result<(), RcaError> {
        match self.area(area) {
            Some(handler) => handler.update_size(origin, size),
            None => {
                warn!(area, "size update for unknown area dropped");
                Ok(())
            }
        }
    }

    /// Forward an interaction event. Unknown areas are logged and ignored.
    pub fn on_interaction(
        &self,
        area: &str,
        origin: &str,
        event: InteractionEvent,
    ) -> Result<(), RcaError> {
        match self.area(area) {
            Some(handler) => handler.on_interaction(origin, event),
            None => {
                warn!(area, event = %event.kind, "interaction for unknown area dropped");
                Ok(())
            }
        }
    }

    /// Execute one inbound RPC.
    pub fn handle_call(
        &self,
        method: &str,
        args: &[Value],
        attachments: &[Bytes],
    ) -> Result<Value, RcaError> {
        match RpcMethod::try_from(method)? {
            RpcMethod::Size => {
                let area: String = arg(args, 0, "areaName")?;
                let origin = origin_arg(args);
                let size = match args.get(2) {
                    Some(value) => parse(value.clone(), "size")?,
                    None => SizeSpec::default(),
                };
                self.update_size(&area, &origin, size)?;
            }
            RpcMethod::Push => {
                let area: String = arg(args, 0, "areaName")?;
                let meta: FrameMetadata = arg(args, 1, "metadata")?;
                let index = args
                    .get(2)
                    .and_then(Value::as_str)
                    .and_then(parse_attachment_ref)
                    .unwrap_or(0);
                let content = attachments.get(index).cloned().ok_or_else(|| {
                    RcaError::InvalidArgument(format!("missing attachment {index}"))
                })?;
                self.push_content(&area, meta, content);
            }
            RpcMethod::Event => {
                let area: String = arg(args, 0, "areaName")?;
                let origin = origin_arg(args);
                let event: InteractionEvent = arg(args, 2, "event")?;
                self.on_interaction(&area, &origin, event)?;
            }
        }
        Ok(Value::Null)
    }

    /// Answer calls arriving on `inbound` until the peer disconnects, then
    /// close every registered area.
    ///
    /// Calls run one at a time on the blocking pool: handlers lock their
    /// frame source, which a capture may hold for a whole render.
    pub async fn serve(self: &Arc<Self>, mut inbound: mpsc::Receiver<Packet>) {
        while let Some(packet) = inbound.recv().await {
            let (message, attachments) = packet.into_parts();
            match message {
                Message::Call { id, method, args } => {
                    let registry = Arc::clone(self);
                    let call_method = method.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        registry.handle_call(&call_method, &args, &attachments)
                    })
                    .await
                    .map_err(RcaError::from)
                    .and_then(|outcome| outcome);
                    if let Err(e) = &outcome {
                        debug!(%method, "call failed: {e}");
                    }
                    let reply = Packet::new(Message::reply(id, outcome));
                    if self.outbound.send(reply).await.is_err() {
                        break;
                    }
                }
                other => debug!(kind = other.kind(), "ignoring inbound message"),
            }
        }
        debug!("peer disconnected");
        self.close_all().await;
    }

    /// Detach and close every area.
    pub async fn close_all(&self) {
        let handlers: Vec<Arc<dyn AreaHandler>> =
            self.write_areas().drain().map(|(_, handler)| handler).collect();
        for handler in handlers {
            handler.set_streamer(None);
            handler.close().await;
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn read_areas(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn AreaHandler>>> {
        self.areas.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_areas(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn AreaHandler>>> {
        self.areas.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Streamer for StreamRegistry {
    fn push_content(&self, area: &str, meta: FrameMetadata, content: Bytes) {
        let data = json!({
            "name": area,
            "meta": meta,
            "content": attachment_ref(0),
        });
        let packet = Packet::with_attachments(
            Message::Publish {
                topic: STREAM_TOPIC.to_string(),
                data,
            },
            vec![content],
        );

        match self.outbound.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(area, "outbound queue full; frame dropped"),
            Err(TrySendError::Closed(_)) => debug!(area, "connection closed; frame dropped"),
        }
    }
}

// ── Argument helpers ─────────────────────────────────────────────

fn parse<T: DeserializeOwned>(value: Value, name: &str) -> Result<T, RcaError> {
    serde_json::from_value(value).map_err(|e| RcaError::InvalidArgument(format!("{name}: {e}")))
}

fn arg<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<T, RcaError> {
    let value = args
        .get(index)
        .cloned()
        .ok_or_else(|| RcaError::InvalidArgument(format!("missing argument {name}")))?;
    parse(value, name)
}

fn origin_arg(args: &[Value]) -> String {
    args.get(1).and_then(Value::as_str).unwrap_or_default().to_string()
}
