//! In-process transport pairing one hub host with many windows
//!
//! Every request, reply and push is framed as a JSON-RPC string and parsed
//! on the other side, so the loopback exercises the same wire contract as
//! an out-of-process transport would.

use super::{Subscription, SubscriptionId, Transport};
use crate::hub::{
    DisappearHook, EndpointHandle, EndpointId, InvokeHandler, IpcHost, NotifyHandler,
};
use crate::protocol::{
    error_codes, Channel, JsonRpcError, JsonRpcReply, JsonRpcRequest, JsonRpcResponse,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct HostTables {
    handlers: RwLock<HashMap<Channel, InvokeHandler>>,
    listeners: RwLock<HashMap<Channel, Vec<NotifyHandler>>>,
}

impl HostTables {
    fn dispatch_invoke(&self, caller: EndpointId, raw: &str) -> String {
        let reply = match JsonRpcRequest::from_json(raw) {
            Err(e) => JsonRpcReply::Error(JsonRpcError::new(
                error_codes::PARSE_ERROR,
                e.to_string(),
                serde_json::Value::Null,
            )),
            Ok(request) => self.answer(caller, request),
        };

        reply.to_json().unwrap_or_else(|e| {
            warn!("Failed to encode reply for {}: {}", caller, e);
            format!(
                r#"{{"jsonrpc":"2.0","error":{{"code":{},"message":"reply encoding failed"}},"id":null}}"#,
                error_codes::INTERNAL_ERROR
            )
        })
    }

    fn answer(&self, caller: EndpointId, request: JsonRpcRequest) -> JsonRpcReply {
        let id = request.id.clone().unwrap_or(serde_json::Value::Null);
        let handler = request
            .channel()
            .ok()
            .and_then(|channel| self.handlers.read().get(&channel).cloned());
        let Some(handler) = handler else {
            return JsonRpcReply::Error(JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("No handler bound for {}", request.method),
                id,
            ));
        };

        match handler(caller, request.params) {
            Ok(result) => JsonRpcReply::Result(JsonRpcResponse::new(result, id)),
            Err(e) => JsonRpcReply::Error(JsonRpcError::from_error(&e, id)),
        }
    }

    fn dispatch_notify(&self, caller: EndpointId, raw: &str) -> Result<()> {
        let note = JsonRpcRequest::from_json(raw)?;
        let channel = note.channel()?;
        let listeners = self
            .listeners
            .read()
            .get(&channel)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            debug!("No listener for {} from {}", channel, caller);
        }
        for listener in listeners {
            listener(caller, note.params.clone());
        }
        Ok(())
    }
}

/// Coordinator end of the loopback transport
#[derive(Clone, Default)]
pub struct LoopbackHost {
    tables: Arc<HostTables>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a window: the hub-side handle plus the window-side transport
    pub fn open_window(&self) -> (Arc<LoopbackEndpoint>, Arc<LoopbackTransport>) {
        let state = Arc::new(WindowState {
            id: EndpointId::new(),
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        });
        debug!("Opened loopback window {}", state.id);
        (
            Arc::new(LoopbackEndpoint {
                state: Arc::clone(&state),
            }),
            Arc::new(LoopbackTransport {
                state,
                host: Arc::downgrade(&self.tables),
                next_request: AtomicU64::new(1),
            }),
        )
    }

    pub fn handler_count(&self) -> usize {
        self.tables.handlers.read().len()
    }

    pub fn listener_count(&self) -> usize {
        self.tables.listeners.read().values().map(Vec::len).sum()
    }
}

impl IpcHost for LoopbackHost {
    fn handle(&self, channel: Channel, handler: InvokeHandler) {
        if self
            .tables
            .handlers
            .write()
            .insert(channel, handler)
            .is_some()
        {
            warn!("Replaced existing handler for {}", channel);
        }
    }

    fn remove_handler(&self, channel: Channel) {
        self.tables.handlers.write().remove(&channel);
    }

    fn on(&self, channel: Channel, listener: NotifyHandler) {
        self.tables
            .listeners
            .write()
            .entry(channel)
            .or_default()
            .push(listener);
    }

    fn remove_listeners(&self, channel: Channel) {
        self.tables.listeners.write().remove(&channel);
    }
}

type Subscriber = (SubscriptionId, Channel, mpsc::UnboundedSender<serde_json::Value>);

struct WindowState {
    id: EndpointId,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
    hooks: Mutex<Vec<DisappearHook>>,
}

impl WindowState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("Window {} is closed", self.id)));
        }
        Ok(())
    }

    fn deliver(&self, raw: &str) -> Result<()> {
        let note = JsonRpcRequest::from_json(raw)?;
        let channel = note.channel()?;
        self.subscribers.lock().retain(|(_, subscribed, tx)| {
            *subscribed != channel || tx.send(note.params.clone()).is_ok()
        });
        Ok(())
    }
}

/// Hub-side handle of a loopback window
pub struct LoopbackEndpoint {
    state: Arc<WindowState>,
}

impl LoopbackEndpoint {
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Simulate the window closing. Disappearance hooks run exactly once.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.subscribers.lock().clear();
        let hooks: Vec<DisappearHook> = self.state.hooks.lock().drain(..).collect();
        info!(
            "Loopback window {} closed, running {} hook(s)",
            self.state.id,
            hooks.len()
        );
        for hook in hooks {
            hook();
        }
    }
}

impl EndpointHandle for LoopbackEndpoint {
    fn id(&self) -> EndpointId {
        self.state.id
    }

    fn push(&self, channel: Channel, payload: serde_json::Value) -> Result<()> {
        self.state.ensure_open()?;
        let raw = JsonRpcRequest::notification(channel, payload).to_json()?;
        self.state.deliver(&raw)
    }

    fn on_disappear(&self, hook: DisappearHook) {
        if self.is_closed() {
            hook();
            return;
        }
        self.state.hooks.lock().push(hook);
    }
}

/// Window-side end of the loopback transport
pub struct LoopbackTransport {
    state: Arc<WindowState>,
    host: Weak<HostTables>,
    next_request: AtomicU64,
}

impl LoopbackTransport {
    pub fn endpoint_id(&self) -> EndpointId {
        self.state.id
    }

    fn host(&self) -> Result<Arc<HostTables>> {
        self.state.ensure_open()?;
        self.host
            .upgrade()
            .ok_or_else(|| Error::Transport("Hub host has shut down".to_string()))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn invoke(
        &self,
        channel: Channel,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let host = self.host()?;
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let raw = JsonRpcRequest::new(channel, payload, id.into()).to_json()?;
        let reply = host.dispatch_invoke(self.state.id, &raw);
        JsonRpcReply::from_json(&reply)?.into_result()
    }

    fn send(&self, channel: Channel, payload: serde_json::Value) -> Result<()> {
        let host = self.host()?;
        let raw = JsonRpcRequest::notification(channel, payload).to_json()?;
        host.dispatch_notify(self.state.id, &raw)
    }

    fn subscribe(&self, channel: Channel) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();
        // A closed window keeps the sender dropped so the stream ends at once.
        if !self.state.closed.load(Ordering::SeqCst) {
            self.state.subscribers.lock().push((id, channel, tx));
        }
        Subscription { id, rx }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state
            .subscribers
            .lock()
            .retain(|(subscribed, _, _)| *subscribed != id);
    }
}
