use crate::{normalize_client_id, MqttConfig};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ng_thing_sdk::{
    ConnectOptions, ConnectionLostHandler, MessageHandler, Qos, SubscriptionId, TopicFilter,
    Transport, TransportError, TransportResult,
};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

struct Route {
    filter: TopicFilter,
    qos: Qos,
    handler: MessageHandler,
}

/// State shared between the transport handle and its event loop task.
#[derive(Default)]
struct Shared {
    client: ArcSwapOption<AsyncClient>,
    routes: DashMap<SubscriptionId, Route>,
    lost: RwLock<Option<ConnectionLostHandler>>,
}

impl Shared {
    /// Hand an inbound publish to every local subscription whose filter matches.
    fn route(&self, topic: &str, payload: Bytes) -> usize {
        let handlers: Vec<MessageHandler> = self
            .routes
            .iter()
            .filter(|r| r.filter.matches(topic))
            .map(|r| Arc::clone(&r.handler))
            .collect();
        if handlers.is_empty() {
            trace!(topic = %topic, "No local subscription for inbound publish");
        }
        for handler in &handlers {
            handler(topic, payload.clone());
        }
        handlers.len()
    }

    /// Distinct expressions with the strongest QoS requested for each.
    fn expressions(&self) -> Vec<(String, Qos)> {
        let mut expressions: Vec<(String, Qos)> = Vec::new();
        for route in self.routes.iter() {
            let expression = route.filter.expression();
            match expressions.iter_mut().find(|(e, _)| e == expression) {
                Some((_, qos)) => *qos = stronger(*qos, route.qos),
                None => expressions.push((expression.to_string(), route.qos)),
            }
        }
        expressions
    }

    fn has_expression(&self, expression: &str) -> bool {
        self.routes
            .iter()
            .any(|r| r.filter.expression() == expression)
    }

    fn connection_lost(&self, reason: String) {
        self.client.store(None);
        let handler = self.lost.read().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(Some(reason));
        }
    }
}

/// [`Transport`] over one MQTT session.
///
/// Each `connect` builds a fresh rumqttc client, waits for the ConnAck, restores the
/// local subscriptions and then drives the event loop on its own task until the
/// connection drops or `disconnect` is called. Reconnection is left to the caller's
/// connect strategy.
pub struct MqttTransport {
    config: MqttConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    session: Mutex<Option<CancellationToken>>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.client.load().is_some()
    }

    fn client(&self) -> TransportResult<Arc<AsyncClient>> {
        self.shared
            .client
            .load_full()
            .ok_or(TransportError::NotConnected)
    }

    fn mqtt_options(&self, options: &ConnectOptions) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(
            client_id(options),
            self.config.host.clone(),
            self.config.port,
        );
        if let Some(username) = &options.username {
            mqtt_options.set_credentials(username, options.password.clone().unwrap_or_default());
        }
        mqtt_options.set_keep_alive(Duration::from_secs(options.keep_alive_secs.max(5)));
        mqtt_options.set_clean_session(options.clean_session);
        mqtt_options
    }

    /// Stop the current event loop task, if any.
    fn end_session(&self) {
        let previous = self.session.lock().ok().and_then(|mut s| s.take());
        if let Some(cancel) = previous {
            cancel.cancel();
        }
        self.shared.client.store(None);
    }

    async fn restore_subscriptions(&self, client: &AsyncClient) -> TransportResult<()> {
        for (expression, qos) in self.shared.expressions() {
            client
                .subscribe(expression.as_str(), to_mqtt_qos(qos))
                .await
                .map_err(|e| TransportError::Subscribe {
                    expression: expression.clone(),
                    reason: e.to_string(),
                })?;
            debug!(expression = %expression, "Subscription restored");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: &ConnectOptions) -> TransportResult<()> {
        self.end_session();

        let (client, mut event_loop) =
            AsyncClient::new(self.mqtt_options(options), self.config.channel_capacity.max(1));
        let timeout = Duration::from_millis(options.connect_timeout_ms);
        match tokio::time::timeout(timeout, await_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(TransportError::Connect { reason }),
            Err(_) => {
                return Err(TransportError::Connect {
                    reason: format!("no ConnAck within {}ms", options.connect_timeout_ms),
                })
            }
        }
        info!(host = %self.config.host, port = self.config.port, "MQTT connection established");

        let cancel = CancellationToken::new();
        let client = Arc::new(client);
        self.shared.client.store(Some(Arc::clone(&client)));
        if let Ok(mut session) = self.session.lock() {
            *session = Some(cancel.clone());
        }
        tokio::spawn(run_event_loop(
            event_loop,
            Arc::clone(&client),
            Arc::clone(&self.shared),
            cancel,
        ));

        if let Err(e) = self.restore_subscriptions(&client).await {
            self.end_session();
            return Err(TransportError::Connect {
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: Qos, payload: Bytes) -> TransportResult<()> {
        let client = self.client()?;
        client
            .publish_bytes(topic, to_mqtt_qos(qos), false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(
        &self,
        expression: &str,
        qos: Qos,
        handler: MessageHandler,
    ) -> TransportResult<SubscriptionId> {
        let filter = TopicFilter::new(expression).map_err(|e| TransportError::Subscribe {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.routes.insert(
            id,
            Route {
                filter,
                qos,
                handler,
            },
        );

        let Some(client) = self.shared.client.load_full() else {
            // Sent to the broker by the next connect.
            debug!(expression = %expression, "Subscription deferred until connected");
            return Ok(id);
        };
        if let Err(e) = client.subscribe(expression, to_mqtt_qos(qos)).await {
            self.shared.routes.remove(&id);
            return Err(TransportError::Subscribe {
                expression: expression.to_string(),
                reason: e.to_string(),
            });
        }
        debug!(expression = %expression, subscription = id.0, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, expression: &str, id: SubscriptionId) -> TransportResult<()> {
        self.shared.routes.remove(&id);
        if self.shared.has_expression(expression) {
            // Another local subscription still needs the broker-side one.
            return Ok(());
        }
        let Some(client) = self.shared.client.load_full() else {
            return Ok(());
        };
        client
            .unsubscribe(expression)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let client = self.shared.client.load_full();
        self.end_session();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "MQTT disconnect request not delivered");
            }
        }
        info!(host = %self.config.host, "MQTT transport disconnected");
        Ok(())
    }

    fn set_connection_lost_handler(&self, handler: ConnectionLostHandler) {
        if let Ok(mut lost) = self.shared.lost.write() {
            *lost = Some(handler);
        }
    }
}

async fn await_connack(event_loop: &mut EventLoop) -> Result<(), String> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(format!("broker refused connection: {code:?}")),
                };
            }
            Ok(event) => trace!(?event, "MQTT event before ConnAck"),
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// `_client` keeps the request channel open for as long as the loop is polled.
async fn run_event_loop(
    mut event_loop: EventLoop,
    _client: Arc<AsyncClient>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("MQTT event loop cancelled");
                break;
            }
            result = event_loop.poll() => result,
        };
        match result {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared.route(&publish.topic, publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("MQTT server sent disconnect");
                shared.connection_lost("server sent disconnect".to_string());
                break;
            }
            Ok(Event::Incoming(Packet::PingResp)) => {
                trace!("MQTT ping response received");
            }
            Ok(event) => {
                trace!(?event, "MQTT event");
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                warn!(error = %e, "MQTT event loop error");
                shared.connection_lost(e.to_string());
                break;
            }
        }
    }
}

/// Client id from the options, or `ng-thing-` plus a short random suffix.
fn client_id(options: &ConnectOptions) -> String {
    match &options.client_id {
        Some(client_id) => normalize_client_id(client_id),
        None => {
            let short = Uuid::new_v4().simple().to_string();
            normalize_client_id(&format!("ng-thing-{}", &short[..8]))
        }
    }
}

#[inline]
fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[inline]
fn stronger(a: Qos, b: Qos) -> Qos {
    let rank = |q: Qos| match q {
        Qos::AtMostOnce => 0,
        Qos::AtLeastOnce => 1,
        Qos::ExactlyOnce => 2,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}
