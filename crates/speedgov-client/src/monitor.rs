//! Sync Monitor - 检测会话是否仍在同步
//!
//! 记录最后一次收到输出状态的时间。连续"无数据"超过超时即视为失步。
//!
//! 使用相对于进程启动的单调时间（微秒），不受系统时钟调整影响，
//! 可以无锁存放在 `AtomicU64` 中供状态读取方查询。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static APP_START: OnceLock<Instant> = OnceLock::new();

fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// 同步监视器
#[derive(Debug)]
pub struct SyncMonitor {
    last_state: AtomicU64,
    timeout: Duration,
}

impl SyncMonitor {
    /// # Example
    /// ```
    /// # use speedgov_client::SyncMonitor;
    /// # use std::time::Duration;
    /// let monitor = SyncMonitor::new(Duration::from_secs(1));
    /// assert!(monitor.is_synchronized());
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_state: AtomicU64::new(monotonic_micros()),
            timeout,
        }
    }

    /// 收到一个输出状态
    pub fn register_state(&self) {
        self.last_state.store(monotonic_micros(), Ordering::Relaxed);
    }

    /// 重新开始计时（新会话开始交换时调用）
    pub fn reset(&self) {
        self.register_state();
    }

    pub fn time_since_last_state(&self) -> Duration {
        let last_us = self.last_state.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last_us))
    }

    /// 超时窗口内收到过状态
    pub fn is_synchronized(&self) -> bool {
        self.time_since_last_state() < self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_desync_after_timeout() {
        let monitor = SyncMonitor::new(Duration::from_millis(30));
        assert!(monitor.is_synchronized());

        thread::sleep(Duration::from_millis(50));
        assert!(!monitor.is_synchronized());

        monitor.register_state();
        assert!(monitor.is_synchronized());
        assert!(monitor.time_since_last_state() < Duration::from_millis(30));
    }
}
