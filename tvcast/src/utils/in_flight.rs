//! Shared pending results for request deduplication.
//!
//! When several callers ask for the same work at once, one of them does it
//! and the others wait on an [`InFlight`] for the same outcome.

use std::sync::Arc;

use tokio::sync::{Notify, OnceCell};

/// One pending result, set exactly once and observed by every waiter.
pub struct InFlightState<T, E> {
    result: OnceCell<Result<T, E>>,
    notify: Notify,
}

impl<T: Clone, E: Clone> InFlightState<T, E> {
    pub fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    /// Publish the outcome. Later calls are ignored.
    pub fn set_result(&self, result: Result<T, E>) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        self.result.initialized()
    }

    pub async fn wait(&self) -> Result<T, E> {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

impl<T: Clone, E: Clone> Default for InFlightState<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

pub type InFlight<T, E> = Arc<InFlightState<T, E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_waiters_see_the_same_result() {
        let state: InFlight<u32, String> = Arc::new(InFlightState::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        state.set_result(Ok(7));
        state.set_result(Ok(8));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(7));
        }
        assert!(state.is_done());
    }
}
