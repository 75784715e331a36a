//! Endpoint side of the transport primitive and the typed hub client

pub mod loopback;

use crate::envelope::SignalingEnvelope;
use crate::error::RelayError;
use crate::protocol::Channel;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle for removing a channel subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of pushes received on one channel
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

/// Request/response invocation plus one-way notification, window to hub.
///
/// Ordered and reliable per channel; the window may disappear at any time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke a request channel and wait for its reply
    async fn invoke(&self, channel: Channel, payload: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Send a one-way notification
    fn send(&self, channel: Channel, payload: serde_json::Value) -> Result<()>;

    /// Receive pushes on `channel` until unsubscribed
    fn subscribe(&self, channel: Channel) -> Subscription;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Typed calls against the hub's four channels
#[derive(Clone)]
pub struct HubClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl HubClient {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn invoke(
        &self,
        channel: Channel,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        tokio::time::timeout(self.timeout, self.transport.invoke(channel, payload))
            .await
            .map_err(|_| {
                Error::OperationTimeout(format!(
                    "{} did not answer within {:?}",
                    channel, self.timeout
                ))
            })?
    }

    /// Name the hub has registered for this window
    pub async fn own_name(&self) -> Result<String> {
        match self
            .invoke(Channel::GetOwnWindowName, serde_json::Value::Null)
            .await?
        {
            serde_json::Value::String(name) => Ok(name),
            serde_json::Value::Null => Err(Error::SelfNotRegistered),
            other => Err(Error::SerializationError(format!(
                "Unexpected own-name reply: {}",
                other
            ))),
        }
    }

    pub async fn registered_names(&self) -> Result<Vec<String>> {
        let reply = self
            .invoke(Channel::GetRegisteredWindows, serde_json::Value::Null)
            .await?;
        serde_json::from_value(reply).map_err(|e| {
            Error::SerializationError(format!("Unexpected registered-windows reply: {}", e))
        })
    }

    /// Ask the relay to forward `envelope`; a missing receiver comes back as a value
    pub async fn signal(&self, envelope: &SignalingEnvelope) -> Result<Option<RelayError>> {
        let reply = self.invoke(Channel::Signal, envelope.to_value()?).await?;
        serde_json::from_value(reply).map_err(|e| {
            Error::SerializationError(format!("Unexpected signal reply: {}", e))
        })
    }

    /// Broadcast a log line to every window
    pub fn log(&self, message: impl Into<String>) -> Result<()> {
        self.transport
            .send(Channel::Log, serde_json::Value::String(message.into()))
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        self.transport.subscribe(channel)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.transport.unsubscribe(id)
    }
}
