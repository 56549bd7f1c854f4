use crate::{
    error::{OpResult, TransportError},
    path::DevicePath,
    transport::{ConnectOptions, Transport},
};
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Connection lifecycle as observed by the operation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Retry parameters for connection establishment.
///
/// The sleep before retry `n` (0-based) is `min(max_interval_ms, step_interval_ms * (n + 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPolicy {
    /// Maximum number of retries after the first attempt (None = unlimited)
    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default = "ConnectPolicy::default_step_interval_ms")]
    pub step_interval_ms: u64,

    #[serde(default = "ConnectPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            limit: None,
            step_interval_ms: Self::default_step_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
        }
    }
}

impl ConnectPolicy {
    fn default_step_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        30_000
    }

    pub fn unlimited(step_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            limit: None,
            step_interval_ms,
            max_interval_ms,
        }
    }

    pub fn limited(limit: u32, step_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            limit: Some(limit),
            step_interval_ms,
            max_interval_ms,
        }
    }
}

/// Linear backoff driven by the attempt count, not by elapsed time.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max: Duration,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(policy: &ConnectPolicy) -> Self {
        Self {
            step: Duration::from_millis(policy.step_interval_ms),
            max: Duration::from_millis(policy.max_interval_ms),
            attempt: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self
            .step
            .saturating_mul(self.attempt.saturating_add(1))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Retry state machine for (re)establishing the transport connection.
///
/// `Disconnected -> Connecting -> Connected`, and after a drop
/// `Connected -> Reconnecting -> Connected` (or `Disconnected` once a limited policy
/// is exhausted). Backoff sleeps are interruptible: [`ConnectStrategy::interrupt`]
/// abandons the operation with the last connection error.
pub struct ConnectStrategy {
    policy: ConnectPolicy,
    interrupt: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectStrategy {
    pub fn new(policy: ConnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            policy,
            interrupt: CancellationToken::new(),
            state_tx,
        }
    }

    /// Retry forever.
    pub fn unlimited(step_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self::new(ConnectPolicy::unlimited(step_interval_ms, max_interval_ms))
    }

    /// Give up after `limit` retries (`limit + 1` attempts) and return the last failure.
    pub fn limited(limit: u32, step_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self::new(ConnectPolicy::limited(
            limit,
            step_interval_ms,
            max_interval_ms,
        ))
    }

    #[inline]
    pub fn policy(&self) -> &ConnectPolicy {
        &self.policy
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Abandon any running or future connect loop.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Connect `transport`, retrying per the policy.
    ///
    /// `is_reconnect` only tags the attempt (state and logs); the backoff math is the
    /// same for both.
    pub async fn connect(
        &self,
        is_reconnect: bool,
        path: &DevicePath,
        options: &ConnectOptions,
        transport: &dyn Transport,
    ) -> OpResult<()> {
        if self.is_interrupted() {
            return Err(TransportError::Closed.into());
        }
        self.set_state(if is_reconnect {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let mut backoff = LinearBackoff::new(&self.policy);
        let mut retries: u32 = 0;

        loop {
            info!(device = %path, attempt = retries + 1, reconnect = is_reconnect, "Connecting");
            let error = match transport.connect(options).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    info!(device = %path, attempt = retries + 1, reconnect = is_reconnect, "Connected");
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!(device = %path, attempt = retries + 1, error = %error, "Connection attempt failed");

            if let Some(limit) = self.policy.limit {
                if retries >= limit {
                    warn!(device = %path, limit, "Connect retries exhausted");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(error.into());
                }
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(Duration::from_millis(self.policy.max_interval_ms));
            retries += 1;
            info!(
                device = %path,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );

            tokio::select! {
                _ = self.interrupt.cancelled() => {
                    info!(device = %path, "Connect backoff interrupted");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(error.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
