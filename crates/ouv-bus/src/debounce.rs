//! Trailing-edge debounce
//!
//! [`Debouncer::schedule`] arms a timer; scheduling again before it fires
//! cancels the previous task and restarts the wait. Only the last task of a
//! burst runs, `delay` after the burst goes quiet.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Cancellable delayed task
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet period
    #[inline]
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Quiet period before a scheduled task runs
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer with `task`
    ///
    /// Outside a tokio runtime there is no timer to arm, so the task runs
    /// immediately.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        if let Ok(runtime) = Handle::try_current() {
            let delay = self.delay;
            *pending = Some(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                task();
            }));
        } else {
            drop(pending);
            tracing::warn!("no async runtime available; running debounced task immediately");
            task();
        }
    }

    /// Disarm the timer
    ///
    /// Returns `true` if a task was waiting and will now not run.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    /// Whether a scheduled task has not fired yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&c);
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_run() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let (count, make) = counter();

        for _ in 0..5 {
            debouncer.schedule(make());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_restarts_the_wait() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let (count, make) = counter();

        debouncer.schedule(make());
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.schedule(make());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_run() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let (count, make) = counter();

        debouncer.schedule(make());
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runs_immediately_without_runtime() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let (count, make) = counter();

        debouncer.schedule(make());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }
}
