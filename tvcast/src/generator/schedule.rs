//! Recurring execution timers.

use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ScheduleInterval;

use super::state::ScheduleStatus;

/// Owned handle to an installed recurring timer.
///
/// Cancelling stops future ticks only; a tick that is already executing
/// runs to completion.
#[derive(Debug)]
pub struct ScheduleHandle {
    pub interval: ScheduleInterval,
    pub installed_at: Instant,
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub(super) fn new(
        interval: ScheduleInterval,
        cancellation_token: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            interval,
            installed_at: Instant::now(),
            cancellation_token,
            task,
        }
    }

    /// Stop future ticks, consuming the handle.
    pub fn cancel(self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Whether the timer task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn status(&self) -> ScheduleStatus {
        ScheduleStatus {
            active: !self.is_cancelled() && !self.is_finished(),
            interval: Some(self.interval.to_string()),
            interval_ms: Some(self.interval.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_stops_timer_task() {
        let token = CancellationToken::new();
        let child = token.child_token();
        let task = tokio::spawn(async move { child.cancelled().await });

        let handle = ScheduleHandle::new(ScheduleInterval::parse("0:30").unwrap(), token.clone(), task);
        assert!(handle.status().active);
        assert_eq!(handle.status().interval_ms, Some(1_800_000));

        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let token = parent.child_token();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        let handle = ScheduleHandle::new(ScheduleInterval::parse("1:00").unwrap(), token, task);
        parent.cancel();
        assert!(handle.is_cancelled());
        assert!(!handle.status().active);
    }
}
