//! Routes addressed signaling envelopes between registered windows

use super::registry::PeerRegistry;
use crate::envelope::SignalingEnvelope;
use crate::error::RelayError;
use crate::protocol::Channel;
use std::sync::Arc;
use tracing::{debug, warn};

/// Forwards envelopes to the endpoint registered under `envelope.receiver`.
///
/// Delivery is at-most-once and best-effort. A receiver missing at lookup
/// time is reported back as a [`RelayError`]; a receiver that vanishes
/// between lookup and push is not, since its disappearance hook emits
/// `peer-left` on its own.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<PeerRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    pub fn forward(&self, envelope: &SignalingEnvelope) -> Option<RelayError> {
        let Some(handle) = self.registry.lookup(&envelope.receiver) else {
            warn!(
                "Dropping {} from '{}': receiver '{}' not registered",
                envelope.channel, envelope.sender, envelope.receiver
            );
            return Some(RelayError::ReceiverNotFound {
                receiver: envelope.receiver.clone(),
            });
        };

        let delivered = envelope
            .to_value()
            .and_then(|payload| handle.push(Channel::Signal, payload));
        match delivered {
            Ok(()) => debug!(
                "Relayed {} '{}' -> '{}'",
                envelope.channel, envelope.sender, envelope.receiver
            ),
            Err(e) => warn!(
                "Delivery of {} to '{}' failed: {}",
                envelope.channel, envelope.receiver, e
            ),
        }
        None
    }
}
