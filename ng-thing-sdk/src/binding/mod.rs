//! Binding engine: one subscription, one decode pipeline, one terminal behavior.
//!
//! An [`OpBind`] is an immutable description (expression + QoS + decoder). Turning it
//! into a live binding yields either a [`Binder`] (consumer-style) or a [`Caller`]
//! (call-style, with its own correlation table).

mod correlation;
pub mod group;
mod statistics;

pub use group::{BindGroup, BinderGroup};
pub use statistics::BinderStatistics;

use crate::{
    config::CallOptions,
    dispatch::DispatchPool,
    error::{OpError, OpResult},
    path::DevicePath,
    pipeline::{Decoder, Encoder},
    protocol::{CallReply, Tokened},
    transport::{MessageHandler, Qos, SubscriptionId, Transport},
};
use bytes::Bytes;
use correlation::CorrelationTable;
use dashmap::DashMap;
use statistics::StatisticsRecorder;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, OnceLock, Weak,
};
use tracing::{debug, info, trace, warn};

/// State shared by every binding of one thing connection.
pub(crate) struct BindingContext {
    pub path: DevicePath,
    pub transport: Arc<dyn Transport>,
    pub pool: DispatchPool,
    registry: DashMap<u64, Arc<BindingCore>>,
    next_id: AtomicU64,
    destroyed: AtomicBool,
}

impl BindingContext {
    pub fn new(path: DevicePath, transport: Arc<dyn Transport>, pool: DispatchPool) -> Self {
        Self {
            path,
            transport,
            pool,
            registry: DashMap::new(),
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ensure_alive(&self) -> OpResult<()> {
        if self.is_destroyed() {
            Err(OpError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Returns `true` only for the call that flipped the flag.
    pub fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn active_bindings(&self) -> usize {
        self.registry.len()
    }

    /// Detach every registered binding and fail its pending calls.
    /// Returns the number of canceled calls.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<u64> = self.registry.iter().map(|e| *e.key()).collect();
        let mut canceled = 0;
        for id in ids {
            if let Some((_, core)) = self.registry.remove(&id) {
                if !core.unbound.swap(true, Ordering::AcqRel) {
                    canceled += (core.canceler)();
                }
            }
        }
        canceled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Consumer,
    Caller,
}

type Canceler = Box<dyn Fn() -> usize + Send + Sync>;

/// Type-erased part of a live binding, tracked in the context registry.
struct BindingCore {
    id: u64,
    kind: BindingKind,
    expression: String,
    subscription: OnceLock<SubscriptionId>,
    stats: StatisticsRecorder,
    unbound: AtomicBool,
    canceler: Canceler,
}

impl BindingCore {
    fn new(id: u64, kind: BindingKind, expression: &str, canceler: Canceler) -> Self {
        Self {
            id,
            kind,
            expression: expression.to_string(),
            subscription: OnceLock::new(),
            stats: StatisticsRecorder::new(),
            unbound: AtomicBool::new(false),
            canceler,
        }
    }

    #[inline]
    fn is_unbound(&self) -> bool {
        self.unbound.load(Ordering::Acquire)
    }

    async fn release(&self, ctx: &BindingContext) {
        if self.unbound.swap(true, Ordering::AcqRel) {
            return;
        }
        let canceled = (self.canceler)();
        ctx.registry.remove(&self.id);
        if let Some(id) = self.subscription.get() {
            if let Err(e) = ctx.transport.unsubscribe(&self.expression, *id).await {
                warn!(
                    device = %ctx.path,
                    expression = %self.expression,
                    error = %e,
                    "Unsubscribe failed, binding released anyway"
                );
            }
        }
        debug!(
            device = %ctx.path,
            expression = %self.expression,
            binding = self.id,
            canceled,
            "Binding released"
        );
    }
}

/// Declarative binding on one topic expression.
///
/// `filter`/`map`/`decode` return new values; the receiver is left untouched.
pub struct OpBind<T> {
    ctx: Arc<BindingContext>,
    expression: String,
    qos: Qos,
    decoder: Decoder<Bytes, T>,
}

impl<T> Clone for OpBind<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            expression: self.expression.clone(),
            qos: self.qos,
            decoder: self.decoder.clone(),
        }
    }
}

impl OpBind<Bytes> {
    pub(crate) fn new(ctx: Arc<BindingContext>, expression: impl Into<String>) -> Self {
        Self {
            ctx,
            expression: expression.into(),
            qos: Qos::default(),
            decoder: Decoder::identity(),
        }
    }
}

impl<T: Send + 'static> OpBind<T> {
    #[inline]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[inline]
    pub fn qos(&self) -> Qos {
        self.qos
    }

    pub fn with_qos(&self, qos: Qos) -> Self {
        let mut bind = self.clone();
        bind.qos = qos;
        bind
    }

    pub fn filter<P>(&self, predicate: P) -> OpBind<T>
    where
        P: Fn(&str, &T) -> bool + Send + Sync + 'static,
    {
        self.with_decoder(self.decoder.filter(predicate))
    }

    pub fn map<V, F>(&self, f: F) -> OpBind<V>
    where
        V: Send + 'static,
        F: Fn(&str, T) -> V + Send + Sync + 'static,
    {
        self.with_decoder(self.decoder.map(f))
    }

    pub fn try_map<V, F>(&self, f: F) -> OpBind<V>
    where
        V: Send + 'static,
        F: Fn(&str, T) -> Result<V, crate::error::DecodeError> + Send + Sync + 'static,
    {
        self.with_decoder(self.decoder.try_map(f))
    }

    /// Append a decode stage.
    pub fn decode<V: Send + 'static>(&self, next: Decoder<T, V>) -> OpBind<V> {
        self.with_decoder(self.decoder.then(next))
    }

    fn with_decoder<V>(&self, decoder: Decoder<Bytes, V>) -> OpBind<V> {
        OpBind {
            ctx: Arc::clone(&self.ctx),
            expression: self.expression.clone(),
            qos: self.qos,
            decoder,
        }
    }

    /// Subscribe and hand every surviving message to `consumer` on the dispatch pool.
    pub async fn consumer<F>(&self, consumer: F) -> OpResult<Binder>
    where
        F: Fn(&str, T) -> OpResult<()> + Send + Sync + 'static,
    {
        let consumer = Arc::new(consumer);
        let core = self
            .attach(BindingKind::Consumer, Box::new(|| 0), move |core, topic, value| {
                let outcome = consumer(topic, value);
                if let Err(e) = &outcome {
                    warn!(topic = %topic, expression = %core.expression, error = %e, "Consumer failed");
                }
                core.stats.record(&outcome);
            })
            .await?;
        Ok(Binder {
            ctx: Arc::clone(&self.ctx),
            core,
        })
    }

    /// Subscribe for replies and return a [`Caller`] publishing `Q` requests.
    ///
    /// `reply` turns the binding's decoded value into a [`CallReply`]; every reply is
    /// routed by token to this binding's own pending calls.
    pub async fn call<Q, R>(
        &self,
        options: CallOptions,
        encoder: Encoder<Q, Bytes>,
        reply: Decoder<T, CallReply<R>>,
    ) -> OpResult<Caller<Q, R>>
    where
        Q: Tokened + Send + 'static,
        R: Send + 'static,
    {
        let table = Arc::new(CorrelationTable::<R>::new(self.expression.clone()));
        let canceler = {
            let table = Arc::clone(&table);
            Box::new(move || table.cancel_all())
        };
        let routed = {
            let table = Arc::clone(&table);
            move |_: &BindingCore, topic: &str, value: T| match reply.decode(topic, value) {
                Ok(Some(reply)) => {
                    table.complete(reply);
                }
                Ok(None) => trace!(topic = %topic, "Reply skipped by pipeline"),
                Err(e) => warn!(topic = %topic, error = %e, "Dropping undecodable reply"),
            }
        };
        let core = self
            .with_qos(options.qos)
            .attach(BindingKind::Caller, canceler, routed)
            .await?;
        Ok(Caller {
            ctx: Arc::clone(&self.ctx),
            core,
            table,
            encoder,
            options,
        })
    }

    /// Subscribe with a handler that decodes on the pool and forwards survivors to `sink`.
    async fn attach<S>(
        &self,
        kind: BindingKind,
        canceler: Canceler,
        sink: S,
    ) -> OpResult<Arc<BindingCore>>
    where
        S: Fn(&BindingCore, &str, T) + Send + Sync + 'static,
    {
        self.ctx.ensure_alive()?;
        let id = self.ctx.next_id.fetch_add(1, Ordering::Relaxed);
        let core = Arc::new(BindingCore::new(id, kind, &self.expression, canceler));
        let handler = message_handler(
            Arc::downgrade(&self.ctx),
            Arc::clone(&core),
            self.decoder.clone(),
            Arc::new(sink),
        );

        let subscription = self
            .ctx
            .transport
            .subscribe(&self.expression, self.qos, handler)
            .await?;
        let _ = core.subscription.set(subscription);
        self.ctx.registry.insert(id, Arc::clone(&core));

        if self.ctx.is_destroyed() {
            core.release(&self.ctx).await;
            return Err(OpError::Destroyed);
        }
        info!(
            device = %self.ctx.path,
            expression = %self.expression,
            binding = id,
            kind = ?kind,
            "Binding established"
        );
        Ok(core)
    }
}

fn message_handler<T, S>(
    ctx: Weak<BindingContext>,
    core: Arc<BindingCore>,
    decoder: Decoder<Bytes, T>,
    sink: Arc<S>,
) -> MessageHandler
where
    T: Send + 'static,
    S: Fn(&BindingCore, &str, T) + Send + Sync + 'static,
{
    Arc::new(move |topic: &str, payload: Bytes| {
        if core.is_unbound() {
            return;
        }
        let Some(ctx) = ctx.upgrade() else {
            return;
        };
        let job = {
            let core = Arc::clone(&core);
            let decoder = decoder.clone();
            let sink = Arc::clone(&sink);
            let topic = topic.to_string();
            async move {
                match decoder.decode(&topic, payload) {
                    Ok(Some(value)) => sink(&core, &topic, value),
                    Ok(None) => trace!(topic = %topic, expression = %core.expression, "Message skipped"),
                    Err(e) => {
                        warn!(topic = %topic, expression = %core.expression, error = %e, "Dropping undecodable message");
                        if core.kind == BindingKind::Consumer {
                            core.stats.update(Some(&OpError::Decode(e)));
                        }
                    }
                }
            }
        };
        if let Err(e) = ctx.pool.submit(job) {
            warn!(topic = %topic, expression = %core.expression, error = %e, "Inbound message rejected");
            if core.kind == BindingKind::Consumer {
                core.stats.update(Some(&e));
            }
        }
    })
}

/// Handle of a consumer-style binding.
pub struct Binder {
    ctx: Arc<BindingContext>,
    core: Arc<BindingCore>,
}

impl Binder {
    #[inline]
    pub fn expression(&self) -> &str {
        &self.core.expression
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        !self.core.is_unbound()
    }

    pub fn statistics(&self) -> BinderStatistics {
        self.core.stats.snapshot()
    }

    /// Stop delivery and unsubscribe. Idempotent; unsubscribe failures are only logged.
    pub async fn unbind(&self) {
        self.core.release(&self.ctx).await;
    }
}

/// Handle of a call-style binding.
pub struct Caller<Q, R> {
    ctx: Arc<BindingContext>,
    core: Arc<BindingCore>,
    table: Arc<CorrelationTable<R>>,
    encoder: Encoder<Q, Bytes>,
    options: CallOptions,
}

impl<Q, R> Clone for Caller<Q, R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            core: Arc::clone(&self.core),
            table: Arc::clone(&self.table),
            encoder: self.encoder.clone(),
            options: self.options,
        }
    }
}

impl<Q, R> Caller<Q, R>
where
    Q: Tokened + Send + 'static,
    R: Send + 'static,
{
    #[inline]
    pub fn expression(&self) -> &str {
        &self.core.expression
    }

    #[inline]
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        !self.core.is_unbound()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn statistics(&self) -> BinderStatistics {
        self.core.stats.snapshot()
    }

    /// Publish `request` to `topic` and wait for the reply carrying its token.
    ///
    /// Fails with `Transport` when the publish is rejected, `Timeout` when no reply
    /// arrives in time and `Operation` when the reply carries a non-OK code.
    ///
    /// Dropping the returned future withdraws the pending call and counts it as
    /// canceled.
    pub async fn call(&self, topic: &str, request: Q) -> OpResult<R> {
        let record = CallRecord::new(&self.core.stats, request.token());
        let outcome = self.exchange(topic, request).await;
        record.finish(&outcome);
        outcome
    }

    /// Publish `request` without registering a pending call.
    pub async fn fire(&self, topic: &str, request: Q) -> OpResult<()> {
        let outcome = self.publish(topic, request).await;
        self.core.stats.record(&outcome);
        outcome
    }

    /// Cancel pending calls and unsubscribe. Idempotent.
    pub async fn unbind(&self) {
        self.core.release(&self.ctx).await;
    }

    async fn exchange(&self, topic: &str, request: Q) -> OpResult<R> {
        self.ctx.ensure_alive()?;
        let token = request.token().to_string();
        if !request.expects_reply() {
            return Err(OpError::InvalidRequest {
                reason: format!("request '{token}' does not expect a reply"),
            });
        }

        let pending = self.table.register(&token)?;
        if self.core.is_unbound() {
            return Err(OpError::Canceled { token });
        }

        self.publish(topic, request).await?;
        trace!(token = %token, topic = %topic, "Request published, awaiting reply");

        let reply = pending.wait(self.options.timeout()).await?;
        Ok(reply.outcome?)
    }

    async fn publish(&self, topic: &str, request: Q) -> OpResult<()> {
        self.ctx.ensure_alive()?;
        let payload = self.encoder.encode(request)?;
        self.ctx
            .transport
            .publish(topic, self.options.qos, payload)
            .await?;
        Ok(())
    }
}

/// Statistics entry of one `Caller::call`, recorded as canceled if the call is dropped
/// before it resolves.
struct CallRecord<'a> {
    stats: &'a StatisticsRecorder,
    token: String,
    done: bool,
}

impl<'a> CallRecord<'a> {
    fn new(stats: &'a StatisticsRecorder, token: &str) -> Self {
        Self {
            stats,
            token: token.to_string(),
            done: false,
        }
    }

    fn finish<T>(mut self, outcome: &OpResult<T>) {
        self.done = true;
        self.stats.record(outcome);
    }
}

impl Drop for CallRecord<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.stats.update(Some(&OpError::Canceled {
                token: std::mem::take(&mut self.token),
            }));
        }
    }
}
