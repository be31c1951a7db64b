//! 关停协调
//!
//! 进程级单调取消标志（false → true，永不复位）加上一个条件变量，
//! 使所有带超时的等待在请求关停后立即被唤醒，而不是睡满一个退避周期。

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 关停原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 操作员在控制台输入 `quit`
    Operator,
    /// Ctrl+C / SIGINT
    Interrupt,
    /// 不可恢复的错误（配置、协商、重试预算耗尽）
    Fatal(String),
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShutdownReason::Fatal(_))
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Operator => write!(f, "operator quit"),
            ShutdownReason::Interrupt => write!(f, "interrupted"),
            ShutdownReason::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    reason: Mutex<Option<ShutdownReason>>,
    wakeup: Condvar,
}

/// 取消标志（可克隆，所有克隆共享同一状态）
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求关停
    ///
    /// 第一个原因生效，之后的请求被忽略。返回本次调用是否设置了原因。
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let mut slot = self.inner.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        // Release: 看到 true 的线程一定能看到原因
        self.inner.requested.store(true, Ordering::Release);
        self.inner.wakeup.notify_all();
        true
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.inner.reason.lock().clone()
    }

    /// 最多等待 `timeout`，期间请求关停则立即返回
    ///
    /// 返回是否已请求关停。可作为可取消的 sleep 使用。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.inner.reason.lock();
        if slot.is_none() {
            self.inner.wakeup.wait_for(&mut slot, timeout);
        }
        slot.is_some()
    }

    /// 阻塞直到请求关停，返回原因
    pub fn wait(&self) -> ShutdownReason {
        let mut slot = self.inner.reason.lock();
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            self.inner.wakeup.wait(&mut slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_first_reason_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());
        assert!(signal.request(ShutdownReason::Operator));
        assert!(!signal.request(ShutdownReason::Fatal("late".into())));

        assert!(signal.is_requested());
        assert_eq!(signal.reason(), Some(ShutdownReason::Operator));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_timeout_wakes_early() {
        let signal = ShutdownSignal::new();
        let waker = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.request(ShutdownReason::Interrupt);
        });

        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_returns_reason() {
        let signal = ShutdownSignal::new();
        let waker = signal.clone();
        let handle = thread::spawn(move || {
            waker.request(ShutdownReason::Fatal("recipe rejected".into()));
        });
        let reason = signal.wait();
        handle.join().unwrap();

        assert!(reason.is_fatal());
        assert_eq!(reason.to_string(), "fatal: recipe rejected");
    }
}
