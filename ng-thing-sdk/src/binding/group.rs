use super::{BindingContext, Binder, BinderStatistics, OpBind};
use crate::error::OpResult;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collects consumer bindings and establishes them as one unit.
pub struct BindGroup {
    ctx: Arc<BindingContext>,
    pending: Vec<BoxFuture<'static, OpResult<Binder>>>,
}

impl BindGroup {
    pub(crate) fn new(ctx: Arc<BindingContext>) -> Self {
        Self {
            ctx,
            pending: Vec::new(),
        }
    }

    /// Queue a consumer binding. Nothing is subscribed until [`BindGroup::commit`].
    pub fn consume<T, F>(mut self, bind: &OpBind<T>, consumer: F) -> Self
    where
        T: Send + 'static,
        F: Fn(&str, T) -> OpResult<()> + Send + Sync + 'static,
    {
        let bind = bind.clone();
        self.pending
            .push(async move { bind.consumer(consumer).await }.boxed());
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Subscribe every queued binding concurrently.
    ///
    /// If any of them fails, the ones that succeeded are unbound again and the first
    /// failure is returned.
    pub async fn commit(self) -> OpResult<BinderGroup> {
        self.ctx.ensure_alive()?;
        let queued = self.pending.len();
        let mut binders = Vec::with_capacity(queued);
        let mut first_error = None;
        for outcome in join_all(self.pending).await {
            match outcome {
                Ok(binder) => binders.push(binder),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => debug!(error = %e, "Additional group binding failure"),
            }
        }

        if let Some(e) = first_error {
            warn!(
                device = %self.ctx.path,
                queued,
                established = binders.len(),
                error = %e,
                "Group commit failed, rolling back"
            );
            for binder in &binders {
                binder.unbind().await;
            }
            return Err(e);
        }

        debug!(device = %self.ctx.path, bindings = binders.len(), "Group committed");
        Ok(BinderGroup { binders })
    }
}

/// Bindings established by one [`BindGroup::commit`].
pub struct BinderGroup {
    binders: Vec<Binder>,
}

impl BinderGroup {
    #[inline]
    pub fn binders(&self) -> &[Binder] {
        &self.binders
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.binders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.binders.is_empty()
    }

    /// Statistics per binding, keyed by topic expression.
    pub fn statistics(&self) -> Vec<(String, BinderStatistics)> {
        self.binders
            .iter()
            .map(|b| (b.expression().to_string(), b.statistics()))
            .collect()
    }

    pub async fn unbind_all(&self) {
        for binder in &self.binders {
            binder.unbind().await;
        }
    }
}
