//! Token -> pending reply table of one call-style binding.
//!
//! Every terminal transition (reply, timeout, cancel, caller gone) goes through a
//! `DashMap` removal, so exactly one of them wins for a given token and the entry
//! never leaks.

use crate::{
    error::{OpError, OpResult},
    protocol::{CallReply, Tokened},
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type ReplySender<R> = oneshot::Sender<OpResult<CallReply<R>>>;
type ReplyReceiver<R> = oneshot::Receiver<OpResult<CallReply<R>>>;

struct PendingCall<R> {
    tx: ReplySender<R>,
    /// Distinguishes reuses of the same token.
    seq: u64,
}

pub(crate) struct CorrelationTable<R> {
    expression: String,
    pending: DashMap<String, PendingCall<R>>,
    next_seq: AtomicU64,
}

impl<R> CorrelationTable<R> {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            pending: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register a pending call for `token`. Must happen before the request is published.
    ///
    /// Dropping the returned handle before it resolves withdraws the call.
    pub fn register(&self, token: &str) -> OpResult<PendingReply<'_, R>> {
        match self.pending.entry(token.to_string()) {
            Entry::Occupied(_) => Err(OpError::InvalidRequest {
                reason: format!("token '{token}' already has a pending call"),
            }),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(PendingCall { tx, seq });
                Ok(PendingReply {
                    table: self,
                    token: token.to_string(),
                    seq,
                    rx,
                })
            }
        }
    }

    /// Route a decoded reply to its pending call.
    ///
    /// Unknown tokens (late arrival after timeout, duplicates, foreign traffic) are
    /// logged and dropped. Returns whether a pending call was completed.
    pub fn complete(&self, reply: CallReply<R>) -> bool {
        let token = reply.token().to_string();
        let Some((_, pending)) = self.pending.remove(&token) else {
            warn!(
                token = %token,
                expression = %self.expression,
                "Dropping reply without a pending call"
            );
            return false;
        };
        if pending.tx.send(Ok(reply)).is_err() {
            debug!(token = %token, "Pending call abandoned before reply delivery");
            return false;
        }
        trace!(token = %token, "Pending call completed");
        true
    }

    /// Remove the entry for `token` only if it is still the registration `seq`.
    fn withdraw(&self, token: &str, seq: u64) -> bool {
        self.pending
            .remove_if(token, |_, pending| pending.seq == seq)
            .is_some()
    }

    /// Fail every outstanding call with `Canceled`. Returns how many were canceled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut canceled = 0;
        for token in tokens {
            if let Some((token, pending)) = self.pending.remove(&token) {
                let _ = pending.tx.send(Err(OpError::Canceled { token }));
                canceled += 1;
            }
        }
        canceled
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Caller side of one registered call.
pub(crate) struct PendingReply<'a, R> {
    table: &'a CorrelationTable<R>,
    token: String,
    seq: u64,
    rx: ReplyReceiver<R>,
}

impl<R> PendingReply<'_, R> {
    /// Wait for the reply, failing with `Timeout` once `timeout` elapses.
    ///
    /// On expiry the entry is withdrawn; if a reply or cancellation removed it first,
    /// that outcome wins and is returned instead.
    pub async fn wait(mut self, timeout: Duration) -> OpResult<CallReply<R>> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(self.canceled()),
            Err(_elapsed) => {
                if self.table.withdraw(&self.token, self.seq) {
                    return Err(OpError::Timeout {
                        token: self.token.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // Lost the race against a completion or cancellation already in flight.
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_closed) => Err(self.canceled()),
                }
            }
        }
    }

    fn canceled(&self) -> OpError {
        OpError::Canceled {
            token: self.token.clone(),
        }
    }
}

impl<R> Drop for PendingReply<'_, R> {
    fn drop(&mut self) {
        if self.table.withdraw(&self.token, self.seq) {
            debug!(
                token = %self.token,
                expression = %self.table.expression,
                "Pending call withdrawn before completion"
            );
        }
    }
}
