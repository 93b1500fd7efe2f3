use super::{FrameCallback, FrameHandle, FrameScheduler};
use anyhow::{ensure, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Fires callbacks on a fixed refresh grid, like a display's vsync
pub struct TokioFrameScheduler {
    runtime: Handle,
    origin: Instant,
    period: Duration,
    next_id: AtomicU64,
}

impl TokioFrameScheduler {
    /// Must be called from inside a tokio runtime.
    pub fn new(refresh_hz: u32) -> Result<Self> {
        ensure!(refresh_hz > 0, "refresh rate must be positive");
        let runtime = Handle::try_current().context("Frame scheduler needs a tokio runtime")?;

        Ok(Self {
            runtime,
            origin: Instant::now(),
            period: Duration::from_secs_f64(1.0 / refresh_hz as f64),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// First refresh boundary strictly after `now`
    fn next_deadline(&self, now: Instant) -> Instant {
        let period = self.period.as_nanos().max(1);
        let ticks = now.saturating_duration_since(self.origin).as_nanos() / period + 1;
        self.origin + Duration::from_nanos((ticks * period) as u64)
    }
}

impl FrameScheduler for TokioFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let deadline = self.next_deadline(Instant::now());
        let pending = handle.clone();

        self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if pending.is_canceled() {
                tracing::trace!("Frame {} canceled", pending.id());
                return;
            }
            callback();
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_callback_once() {
        let scheduler = TokioFrameScheduler::new(200).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        scheduler.request_frame(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canceled_callback_never_runs() {
        let scheduler = TokioFrameScheduler::new(50).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let handle = scheduler.request_frame(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deadlines_land_on_the_refresh_grid() {
        let scheduler = TokioFrameScheduler::new(10).unwrap();
        let origin = scheduler.origin;

        let deadline = scheduler.next_deadline(origin + Duration::from_millis(250));
        assert_eq!(deadline, origin + Duration::from_millis(300));

        let on_boundary = scheduler.next_deadline(origin + Duration::from_millis(300));
        assert_eq!(on_boundary, origin + Duration::from_millis(400));
    }

    #[test]
    fn requires_a_runtime() {
        assert!(TokioFrameScheduler::new(30).is_err());
    }
}
