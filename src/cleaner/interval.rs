//! 定时清理定时器
//!
//! 固定周期触发，首次触发在一个周期之后。drop 即取消。

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// 周期定时器句柄
pub(crate) struct IntervalTimer {
    /// 触发周期
    period: Duration,
    /// 定时任务句柄
    handle: JoinHandle<()>,
}

impl IntervalTimer {
    /// 启动定时器
    pub(crate) fn arm<F, Fut>(period: Duration, on_tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                on_tick().await;
            }
        });

        Self { period, handle }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    /// 取消定时器
    pub(crate) fn cancel(self) {
        // drop 时 abort
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_timer(period: Duration) -> (IntervalTimer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let timer = IntervalTimer::arm(period, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (timer, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (timer, ticks) = counting_timer(Duration::from_secs(300));
        assert_eq!(timer.period(), Duration::from_secs(300));

        time::sleep(Duration::from_secs(299)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (timer, ticks) = counting_timer(Duration::from_secs(60));

        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        timer.cancel();
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
