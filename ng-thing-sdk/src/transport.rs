//! Boundary to the underlying publish/subscribe client.
//!
//! The operation layer treats the transport as a black box exposing async
//! connect/publish/subscribe/unsubscribe plus an inbound-message callback. Wire
//! encoding, TLS and broker topology live behind this trait.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type TransportResult<T> = Result<T, TransportError>;

/// Inbound message callback, invoked on the transport's own task with `(topic, payload)`.
///
/// Implementations must return quickly; the binding engine re-dispatches the work.
pub type MessageHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Connection-lost callback, invoked with an optional reason.
pub type ConnectionLostHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Identifies one local subscription so that two bindings on the same expression can
/// be torn down independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Session parameters handed to [`Transport::connect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Client identifier; generated by the transport when absent
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "ConnectOptions::default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "ConnectOptions::default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "ConnectOptions::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: Self::default_keep_alive_secs(),
            clean_session: Self::default_clean_session(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
        }
    }
}

impl ConnectOptions {
    fn default_keep_alive_secs() -> u64 {
        60
    }

    fn default_clean_session() -> bool {
        true
    }

    fn default_connect_timeout_ms() -> u64 {
        10_000
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one connection attempt.
    async fn connect(&self, options: &ConnectOptions) -> TransportResult<()>;

    async fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> TransportResult<()>;

    /// Subscribe `handler` to `expression`.
    async fn subscribe(
        &self,
        expression: &str,
        qos: Qos,
        handler: MessageHandler,
    ) -> TransportResult<SubscriptionId>;

    /// Remove one local subscription. The broker-side subscription is dropped once no
    /// local subscription for `expression` remains.
    async fn unsubscribe(&self, expression: &str, id: SubscriptionId) -> TransportResult<()>;

    async fn disconnect(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Install the callback fired when an established connection drops.
    fn set_connection_lost_handler(&self, handler: ConnectionLostHandler);
}
