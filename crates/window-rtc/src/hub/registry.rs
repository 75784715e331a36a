//! Name-based registry of live window endpoints

use super::{EndpointHandle, EndpointId};
use crate::envelope::SignalingEnvelope;
use crate::protocol::Channel;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Registry entry: a unique trimmed name bound to one endpoint handle
#[derive(Clone)]
pub struct RegisteredEndpoint {
    pub name: String,
    pub handle: Arc<dyn EndpointHandle>,
}

impl std::fmt::Debug for RegisteredEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEndpoint")
            .field("name", &self.name)
            .field("id", &self.handle.id())
            .finish()
    }
}

/// Membership table mapping unique names to endpoint handles.
///
/// At most one entry per name and at most one per handle. Names compare
/// case-sensitively after trimming.
pub struct PeerRegistry {
    entries: RwLock<Vec<RegisteredEndpoint>>,
    this: Weak<PeerRegistry>,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            entries: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Register `handle` under `name` and arm its disappearance hook.
    ///
    /// Returns the trimmed name actually stored.
    pub fn register(&self, name: &str, handle: Arc<dyn EndpointHandle>) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidName("window name is empty".to_string()));
        }

        let id = handle.id();
        {
            let mut entries = self.entries.write();
            if entries
                .iter()
                .any(|entry| entry.name == name || entry.handle.id() == id)
            {
                return Err(Error::DuplicateName(name.to_string()));
            }
            entries.push(RegisteredEndpoint {
                name: name.to_string(),
                handle: Arc::clone(&handle),
            });
        }

        // Guarded by id so a stale hook never removes a re-registered name.
        let registry = self.this.clone();
        let hook_name = name.to_string();
        handle.on_disappear(Box::new(move || {
            if let Some(registry) = registry.upgrade() {
                debug!("Endpoint {} disappeared, unregistering '{}'", id, hook_name);
                registry.remove(&hook_name, Some(id));
            }
        }));

        info!("Registered window '{}' ({})", name, id);
        Ok(name.to_string())
    }

    /// Remove `name` and notify the remaining endpoints. Absent names are a no-op.
    pub fn unregister(&self, name: &str) {
        self.remove(name.trim(), None);
    }

    /// Name registered for the calling endpoint
    pub fn resolve_own_name(&self, caller: EndpointId) -> Result<String> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.handle.id() == caller)
            .map(|entry| entry.name.clone())
            .ok_or(Error::NotRegistered)
    }

    /// Snapshot of registered names
    pub fn list_names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn EndpointHandle>> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.handle))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Push `payload` on `channel` to every registered endpoint.
    ///
    /// Returns how many endpoints accepted the push.
    pub fn broadcast(&self, channel: Channel, payload: &serde_json::Value) -> usize {
        let targets = self.entries.read().clone();
        targets
            .iter()
            .filter(|entry| match entry.handle.push(channel, payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to push {} to '{}': {}", channel, entry.name, e);
                    false
                }
            })
            .count()
    }

    fn remove(&self, name: &str, only: Option<EndpointId>) -> bool {
        let remaining = {
            let mut entries = self.entries.write();
            let Some(index) = entries.iter().position(|entry| {
                entry.name == name && only.map_or(true, |id| entry.handle.id() == id)
            }) else {
                debug!("Window '{}' is not registered, nothing to unregister", name);
                return false;
            };
            entries.remove(index);
            entries.clone()
        };

        info!(
            "Unregistered window '{}', notifying {} remaining",
            name,
            remaining.len()
        );

        for entry in &remaining {
            let envelope = SignalingEnvelope::peer_left(name, entry.name.clone());
            let pushed = envelope
                .to_value()
                .and_then(|payload| entry.handle.push(Channel::Signal, payload));
            if let Err(e) = pushed {
                warn!(
                    "Failed to notify '{}' that '{}' left: {}",
                    entry.name, name, e
                );
            }
        }

        true
    }
}
