//! Bus → edge forwarding.
//!
//! The forwarder holds one wildcard subscription on `{prefix}.>` and
//! republishes every message to the [`Downstream`] under the edge topic it
//! belongs to, `channels/{channel}/messages[/{subtopic}]`.
//!
//! Messages are handled one at a time per subscription; a slow downstream
//! publish is cut off by the configured timeout and the message dropped.

use std::time::Duration;

use edgegate_bus::{Delivery, Downstream, Subscriber, Subscription};
use edgegate_protocol::topic;

use crate::runtime::Shutdown;
use crate::GatewayError;

/// Forwards bus traffic to a downstream broker.
pub struct Forwarder {
    subscription: Subscription,
    timeout: Duration,
}

impl Forwarder {
    /// Subscribes to every channel under `prefix`.
    ///
    /// # Errors
    /// [`GatewayError::Startup`] if the subscription cannot be opened;
    /// the gateway must not start without it.
    pub async fn subscribe<S: Subscriber>(
        bus: &S,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let pattern = topic::all_channels(prefix);
        let subscription = bus.subscribe(&pattern).await.map_err(|e| {
            GatewayError::Startup(format!("failed to subscribe to {pattern}: {e}"))
        })?;
        tracing::info!(pattern, "forwarder subscribed");
        Ok(Self {
            subscription,
            timeout,
        })
    }

    /// Forwards until `shutdown` fires or the bus closes the subscription.
    ///
    /// # Errors
    /// [`GatewayError::Shutdown`] when the bus ends the subscription
    /// without a shutdown having been requested.
    pub async fn run<D: Downstream>(
        mut self,
        downstream: D,
        mut shutdown: Shutdown,
    ) -> Result<(), GatewayError> {
        loop {
            let delivery = tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("forwarder stopping");
                    return Ok(());
                }
                delivery = self.subscription.recv() => delivery,
            };
            let Some(delivery) = delivery else {
                return Err(GatewayError::Shutdown("bus subscription closed".into()));
            };
            self.forward(&downstream, delivery).await;
        }
    }

    async fn forward<D: Downstream>(&self, downstream: &D, delivery: Delivery) {
        let message = delivery.message;
        let edge_topic = topic::edge_topic(&message.channel, &message.subtopic);

        match tokio::time::timeout(self.timeout, downstream.publish(&edge_topic, &message)).await
        {
            Ok(Ok(receivers)) => {
                tracing::trace!(topic = %edge_topic, receivers, "forwarded");
            }
            Ok(Err(error)) => {
                tracing::warn!(topic = %edge_topic, %error, "failed to forward message");
            }
            Err(_) => {
                tracing::warn!(
                    topic = %edge_topic,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "forward timed out"
                );
            }
        }
    }
}
