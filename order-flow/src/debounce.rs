use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Schedules the deferred flush that closes a debounce window.
///
/// The scheduler holds no per-user state. The session record is the
/// source of truth for what is buffered; a flush callback is expected to
/// re-read it at fire time, so a flush whose buffer was already drained
/// (fast path, competing flush after a re-arm) is a harmless no-op.
#[derive(Clone)]
pub struct FlushScheduler {
    window_ms: i64,
}

impl FlushScheduler {
    pub fn new(window_ms: i64) -> Self {
        Self { window_ms }
    }

    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms)
    }

    pub fn next_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.window()
    }

    /// Run `flush` once the deadline passes. A deadline already in the
    /// past fires on the next scheduler tick.
    pub fn schedule_at<F, Fut>(&self, user_id: &str, deadline: DateTime<Utc>, flush: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wait = (deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let user = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            debug!(user_id = %user, "debounce window elapsed, flushing");
            flush().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn flush_fires_after_the_deadline() {
        let scheduler = FlushScheduler::new(30);
        let fired = Arc::new(AtomicBool::new(false));

        let deadline = scheduler.next_deadline(Utc::now());
        let flag = fired.clone();
        scheduler.schedule_at("u1", deadline, move || async move {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn past_deadline_fires_promptly() {
        let scheduler = FlushScheduler::new(3000);
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        scheduler.schedule_at("u1", Utc::now() - Duration::seconds(1), move || async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
