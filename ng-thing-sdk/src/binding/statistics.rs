use crate::error::OpError;
use serde::Serialize;
use std::sync::Mutex;

/// Per-binding operation counters.
///
/// `total == success + failure`. `timeout`, `rejected` and `canceled` refine
/// `failure` and are counted in it as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinderStatistics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub rejected: u64,
    pub canceled: u64,
}

/// Mutable side of [`BinderStatistics`], one per binding.
#[derive(Debug, Default)]
pub(crate) struct StatisticsRecorder {
    inner: Mutex<BinderStatistics>,
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal outcome. `None` is a success.
    pub fn update(&self, cause: Option<&OpError>) {
        let Ok(mut stats) = self.inner.lock() else {
            return;
        };
        stats.total += 1;
        let Some(cause) = cause else {
            stats.success += 1;
            return;
        };
        stats.failure += 1;
        if cause.is_timeout() {
            stats.timeout += 1;
        } else if cause.is_canceled() {
            stats.canceled += 1;
        } else if cause.is_rejected() {
            stats.rejected += 1;
        }
    }

    #[inline]
    pub fn record<T>(&self, outcome: &Result<T, OpError>) {
        self.update(outcome.as_ref().err());
    }

    pub fn snapshot(&self) -> BinderStatistics {
        self.inner.lock().map(|s| *s).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OperationError, TransportError};

    #[test]
    fn test_classification() {
        let recorder = StatisticsRecorder::new();
        recorder.update(None);
        recorder.update(Some(&OpError::Timeout {
            token: "1".into(),
            timeout_ms: 100,
        }));
        recorder.update(Some(&OpError::Canceled { token: "2".into() }));
        recorder.update(Some(&OpError::Rejected {
            reason: "queue full".into(),
        }));
        recorder.update(Some(&OpError::Transport(TransportError::NotConnected)));
        recorder.update(Some(&OpError::Operation(OperationError {
            token: "3".into(),
            code: 500,
            desc: "x".into(),
        })));

        assert_eq!(
            recorder.snapshot(),
            BinderStatistics {
                total: 6,
                success: 1,
                failure: 5,
                timeout: 1,
                rejected: 1,
                canceled: 1,
            }
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let recorder = StatisticsRecorder::new();
        let before = recorder.snapshot();
        recorder.record::<()>(&Ok(()));
        assert_eq!(before.total, 0);
        assert_eq!(recorder.snapshot().success, 1);
    }
}
