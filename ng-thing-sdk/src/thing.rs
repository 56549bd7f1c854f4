use crate::{
    binding::{BindGroup, Binder, BindingContext, Caller, OpBind},
    config::{CallOptions, ThingOpConfig},
    connect::{ConnectStrategy, ConnectionState},
    dispatch::DispatchPool,
    error::OpResult,
    path::DevicePath,
    pipeline::{codecs, Encoder},
    protocol::OperationRequest,
    token::TokenGenerator,
    transport::{ConnectionLostHandler, Transport},
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Operation facade of one device connection.
///
/// Owns the token generator, the connect strategy, the dispatch pool and every
/// binding created through it. Must be created inside a tokio runtime.
pub struct ThingOp {
    ctx: Arc<BindingContext>,
    tokens: TokenGenerator,
    strategy: Arc<ConnectStrategy>,
    reconnecting: Arc<AtomicBool>,
    config: ThingOpConfig,
}

impl ThingOp {
    pub fn new(path: DevicePath, transport: Arc<dyn Transport>, config: ThingOpConfig) -> Self {
        let pool = DispatchPool::new(config.dispatch.workers, config.dispatch.queue_capacity);
        Self {
            ctx: Arc::new(BindingContext::new(path, transport, pool)),
            tokens: TokenGenerator::new(),
            strategy: Arc::new(ConnectStrategy::new(config.connect)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    #[inline]
    pub fn path(&self) -> &DevicePath {
        &self.ctx.path
    }

    #[inline]
    pub fn config(&self) -> &ThingOpConfig {
        &self.config
    }

    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.strategy.state()
    }

    /// Watch connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.strategy.subscribe_state()
    }

    /// Number of live bindings.
    pub fn active_bindings(&self) -> usize {
        self.ctx.active_bindings()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.ctx.is_destroyed()
    }

    /// Connect the transport and arm automatic reconnection on connection loss.
    pub async fn connect(&self) -> OpResult<()> {
        self.ctx.ensure_alive()?;
        self.ctx
            .transport
            .set_connection_lost_handler(self.connection_lost_handler());
        self.strategy
            .connect(
                false,
                &self.ctx.path,
                &self.config.connection,
                self.ctx.transport.as_ref(),
            )
            .await
    }

    fn connection_lost_handler(&self) -> ConnectionLostHandler {
        let ctx = Arc::downgrade(&self.ctx);
        let strategy = Arc::clone(&self.strategy);
        let reconnecting = Arc::clone(&self.reconnecting);
        let options = self.config.connection.clone();
        let runtime = tokio::runtime::Handle::current();

        Arc::new(move |reason: Option<String>| {
            let Some(ctx) = ctx.upgrade() else {
                return;
            };
            if ctx.is_destroyed() || strategy.is_interrupted() {
                return;
            }
            warn!(device = %ctx.path, reason = ?reason, "Connection lost");
            if reconnecting.swap(true, Ordering::AcqRel) {
                debug!(device = %ctx.path, "Reconnect already in progress");
                return;
            }

            let strategy = Arc::clone(&strategy);
            let reconnecting = Arc::clone(&reconnecting);
            let options = options.clone();
            runtime.spawn(async move {
                let outcome = strategy
                    .connect(true, &ctx.path, &options, ctx.transport.as_ref())
                    .await;
                reconnecting.store(false, Ordering::Release);
                if let Err(e) = outcome {
                    error!(device = %ctx.path, error = %e, "Reconnect abandoned");
                }
            });
        })
    }

    /// Fresh correlation token.
    pub fn gen_token(&self) -> String {
        self.tokens.next()
    }

    /// Build a reply-expecting request with a fresh token.
    pub fn request<P>(&self, method: impl Into<String>, params: P) -> OperationRequest<P> {
        OperationRequest::new(self.gen_token(), method, params)
    }

    /// One-way JSON publish.
    pub async fn post<D>(&self, topic: &str, data: D) -> OpResult<()>
    where
        D: Serialize + Send + 'static,
    {
        self.post_with(topic, &codecs::json_encoder(), data).await
    }

    /// One-way publish through `encoder`.
    pub async fn post_with<D: Send + 'static>(
        &self,
        topic: &str,
        encoder: &Encoder<D, Bytes>,
        data: D,
    ) -> OpResult<()> {
        self.ctx.ensure_alive()?;
        let payload = encoder.encode(data)?;
        let size = payload.len();
        match self
            .ctx
            .transport
            .publish(topic, self.config.call.qos, payload)
            .await
        {
            Ok(()) => {
                debug!(device = %self.ctx.path, topic = %topic, size, "Posted");
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.ctx.path, topic = %topic, error = %e, "Post failed");
                Err(e.into())
            }
        }
    }

    /// Byte-level binding on `expression`.
    pub fn bind(&self, expression: impl Into<String>) -> OpBind<Bytes> {
        OpBind::new(Arc::clone(&self.ctx), expression)
    }

    /// Call-style binding publishing JSON `OperationRequest<P>` and awaiting replies
    /// whose `data` decodes into `R` on success.
    ///
    /// `options` falls back to the configured call defaults.
    pub async fn caller<P, R>(
        &self,
        reply_expression: impl Into<String>,
        options: Option<CallOptions>,
    ) -> OpResult<Caller<OperationRequest<P>, R>>
    where
        P: Serialize + DeserializeOwned + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let options = options.unwrap_or(self.config.call);
        self.bind(reply_expression)
            .call(
                options,
                codecs::request::<P>().encoder(),
                codecs::call_reply::<R>(),
            )
            .await
    }

    /// Consume JSON `OperationRequest<P>` messages published on `expression`.
    pub async fn consume_requests<P, F>(
        &self,
        expression: impl Into<String>,
        consumer: F,
    ) -> OpResult<Binder>
    where
        P: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(&str, OperationRequest<P>) -> OpResult<()> + Send + Sync + 'static,
    {
        self.bind(expression)
            .decode(codecs::request::<P>().decoder())
            .consumer(consumer)
            .await
    }

    /// Start a group of bindings committed together.
    pub fn group(&self) -> BindGroup {
        BindGroup::new(Arc::clone(&self.ctx))
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Interrupts any running connect loop, cancels every pending call, stops the
    /// dispatch pool and disconnects the transport. Later operations fail with
    /// `Destroyed`.
    pub async fn destroy(&self) {
        if !self.ctx.mark_destroyed() {
            return;
        }
        self.strategy.interrupt();
        let canceled = self.ctx.cancel_all();
        self.ctx.pool.shutdown();
        if let Err(e) = self.ctx.transport.disconnect().await {
            warn!(device = %self.ctx.path, error = %e, "Disconnect failed during destroy");
        }
        self.strategy.set_state(ConnectionState::Disconnected);
        info!(device = %self.ctx.path, canceled, "Thing connection destroyed");
    }
}
