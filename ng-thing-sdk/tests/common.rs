#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ng_thing_sdk::{
    ConnectOptions, ConnectPolicy, ConnectionLostHandler, DevicePath, DispatchConfig,
    MessageHandler, Qos, SubscriptionId, ThingOp, ThingOpConfig, TopicFilter, Transport,
    TransportError, TransportResult,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc, Mutex, Once,
};
use tokio::sync::broadcast;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A message published through the loopback transport.
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

struct LocalSubscription {
    id: SubscriptionId,
    filter: TopicFilter,
    handler: MessageHandler,
}

/// In-memory transport: records publishes, routes injected messages to matching
/// subscriptions and lets tests inject failures.
pub struct LoopbackTransport {
    subscriptions: Mutex<Vec<LocalSubscription>>,
    next_id: AtomicU64,
    published: broadcast::Sender<Published>,
    lost: Mutex<Option<ConnectionLostHandler>>,
    connected: AtomicBool,
    connect_attempts: AtomicU32,
    failing_connects: AtomicU32,
    fail_publish: AtomicBool,
    fail_subscribe: Mutex<Option<String>>,
    fail_unsubscribe: AtomicBool,
    unsubscribes: AtomicU32,
    disconnects: AtomicU32,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        let (published, _) = broadcast::channel(256);
        Arc::new(Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            published,
            lost: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU32::new(0),
            failing_connects: AtomicU32::new(0),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: Mutex::new(None),
            fail_unsubscribe: AtomicBool::new(false),
            unsubscribes: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        })
    }

    pub fn published(&self) -> broadcast::Receiver<Published> {
        self.published.subscribe()
    }

    /// Deliver `payload` on `topic` to every matching subscription.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.filter.matches(topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(topic, payload.clone());
        }
    }

    pub fn inject_json(&self, topic: &str, value: serde_json::Value) {
        self.inject(topic, serde_json::to_vec(&value).unwrap());
    }

    /// Simulate a broker-side drop.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let handler = self.lost.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(Some(reason.to_string()));
        }
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe_on(&self, expression: &str) {
        *self.fail_subscribe.lock().unwrap() = Some(expression.to_string());
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn unsubscribes(&self) -> u32 {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, _options: &ConnectOptions) -> TransportResult<()> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Connect {
                reason: format!("loopback refused attempt {attempt}"),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, _qos: Qos, payload: Bytes) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "loopback publish failure".to_string(),
            });
        }
        let _ = self.published.send(Published {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        expression: &str,
        _qos: Qos,
        handler: MessageHandler,
    ) -> TransportResult<SubscriptionId> {
        let failing = self.fail_subscribe.lock().unwrap().clone();
        if failing.as_deref() == Some(expression) {
            return Err(TransportError::Subscribe {
                expression: expression.to_string(),
                reason: "loopback subscribe failure".to_string(),
            });
        }
        let filter = TopicFilter::new(expression).map_err(|e| TransportError::Subscribe {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().unwrap().push(LocalSubscription {
            id,
            filter,
            handler,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, expression: &str, id: SubscriptionId) -> TransportResult<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().retain(|s| s.id != id);
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Unsubscribe {
                expression: expression.to_string(),
                reason: "loopback unsubscribe failure".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_connection_lost_handler(&self, handler: ConnectionLostHandler) {
        *self.lost.lock().unwrap() = Some(handler);
    }
}

/// Config with a single dispatch worker so inbound messages run in arrival order.
pub fn test_config() -> ThingOpConfig {
    ThingOpConfig {
        dispatch: DispatchConfig {
            workers: 1,
            queue_capacity: 64,
        },
        connect: ConnectPolicy::limited(5, 10, 50),
        ..Default::default()
    }
}

pub fn device() -> DevicePath {
    DevicePath::new("p1", "d1")
}

/// Connected thing on top of a fresh loopback transport.
pub async fn connected_thing() -> (ThingOp, Arc<LoopbackTransport>) {
    init_tracing();
    let transport = LoopbackTransport::new();
    let thing = ThingOp::new(device(), transport.clone(), test_config());
    thing.connect().await.unwrap();
    (thing, transport)
}

/// Answer every request published on `request_topic` by injecting the JSON documents
/// returned by `reply` on `reply_topic`. An empty list stays silent.
pub fn spawn_responder<F>(
    transport: Arc<LoopbackTransport>,
    request_topic: &str,
    reply_topic: &str,
    reply: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&serde_json::Value) -> Vec<serde_json::Value> + Send + 'static,
{
    let mut published = transport.published();
    let request_topic = request_topic.to_string();
    let reply_topic = reply_topic.to_string();
    tokio::spawn(async move {
        while let Ok(message) = published.recv().await {
            if message.topic != request_topic {
                continue;
            }
            for answer in reply(&message.json()) {
                transport.inject_json(&reply_topic, answer);
            }
        }
    })
}
