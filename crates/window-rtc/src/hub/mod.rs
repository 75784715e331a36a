//! Coordinator side: window registry, signaling relay and channel handlers
//!
//! The hub is an explicitly constructed service. The hosting process
//! registers windows with it and binds it to an [`IpcHost`]; `dispose`
//! removes the four channel bindings so the process can rebind later.

mod registry;
mod relay;

pub use registry::{PeerRegistry, RegisteredEndpoint};
pub use relay::SignalingRelay;

use crate::envelope::SignalingEnvelope;
use crate::protocol::Channel;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of a window endpoint as seen by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback run once when an endpoint becomes unusable
pub type DisappearHook = Box<dyn FnOnce() + Send + 'static>;

/// Hub-side reference to a live window
pub trait EndpointHandle: Send + Sync {
    fn id(&self) -> EndpointId;

    /// Fire-and-forget push on `channel`
    fn push(&self, channel: Channel, payload: serde_json::Value) -> Result<()>;

    /// Arm a hook the windowing layer must run exactly once on teardown.
    /// Runs immediately if the endpoint is already gone.
    fn on_disappear(&self, hook: DisappearHook);
}

/// Handler for request/response channels
pub type InvokeHandler =
    Arc<dyn Fn(EndpointId, serde_json::Value) -> Result<serde_json::Value> + Send + Sync>;

/// Listener for one-way notification channels
pub type NotifyHandler = Arc<dyn Fn(EndpointId, serde_json::Value) + Send + Sync>;

/// Coordinator end of the transport primitive
pub trait IpcHost: Send + Sync {
    fn handle(&self, channel: Channel, handler: InvokeHandler);
    fn remove_handler(&self, channel: Channel);
    fn on(&self, channel: Channel, listener: NotifyHandler);
    fn remove_listeners(&self, channel: Channel);
}

/// The coordinator service owning the registry and relay
pub struct WindowHub {
    registry: Arc<PeerRegistry>,
    relay: SignalingRelay,
    host: Mutex<Option<Arc<dyn IpcHost>>>,
}

impl WindowHub {
    pub fn new() -> Self {
        let registry = PeerRegistry::new();
        let relay = SignalingRelay::new(Arc::clone(&registry));
        Self {
            registry,
            relay,
            host: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    /// Register a window under a unique name
    pub fn register(&self, name: &str, handle: Arc<dyn EndpointHandle>) -> Result<String> {
        self.registry.register(name, handle)
    }

    pub fn unregister(&self, name: &str) {
        self.registry.unregister(name)
    }

    pub fn is_bound(&self) -> bool {
        self.host.lock().is_some()
    }

    /// Install the channel handlers on `host`, replacing any previous binding
    pub fn bind(&self, host: Arc<dyn IpcHost>) {
        self.dispose();

        let registry = Arc::clone(&self.registry);
        host.handle(
            Channel::GetOwnWindowName,
            Arc::new(move |caller, _params| {
                Ok(match registry.resolve_own_name(caller) {
                    Ok(name) => serde_json::Value::String(name),
                    Err(_) => {
                        debug!("Endpoint {} asked for its name but is not registered", caller);
                        serde_json::Value::Null
                    }
                })
            }),
        );

        let registry = Arc::clone(&self.registry);
        host.handle(
            Channel::GetRegisteredWindows,
            Arc::new(move |_caller, _params| Ok(serde_json::json!(registry.list_names()))),
        );

        let relay = self.relay.clone();
        host.handle(
            Channel::Signal,
            Arc::new(move |caller, params| {
                let envelope = SignalingEnvelope::from_value(params)?;
                debug!("Signal {} from endpoint {}", envelope.channel, caller);
                serde_json::to_value(relay.forward(&envelope)).map_err(|e| {
                    Error::SerializationError(format!("Failed to encode relay result: {}", e))
                })
            }),
        );

        let registry = Arc::clone(&self.registry);
        host.on(
            Channel::Log,
            Arc::new(move |caller, message| {
                if !message.is_string() {
                    warn!("Ignoring non-string log line from endpoint {}", caller);
                    return;
                }
                registry.broadcast(Channel::Log, &message);
            }),
        );

        *self.host.lock() = Some(host);
        info!("Window hub bound to transport");
    }

    /// Remove all four channel bindings. Safe to call repeatedly.
    pub fn dispose(&self) {
        let Some(host) = self.host.lock().take() else {
            return;
        };
        host.remove_handler(Channel::GetOwnWindowName);
        host.remove_handler(Channel::GetRegisteredWindows);
        host.remove_handler(Channel::Signal);
        host.remove_listeners(Channel::Log);
        info!("Window hub unbound from transport");
    }
}

impl Default for WindowHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WindowHub {
    fn drop(&mut self) {
        self.dispose();
    }
}
