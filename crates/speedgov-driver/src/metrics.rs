//! 接入统计
//!
//! 原子计数器，接入线程写入、任意线程读取，全部 `Relaxed`。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 接入层计数器
#[derive(Debug, Default)]
pub struct IngressMetrics {
    /// 成功解码并发布的样本数
    pub samples_published: AtomicU64,
    /// 发布时覆盖了未读样本的次数
    pub mailbox_overwrites: AtomicU64,
    /// 长度错误 / 非有限值 / 格式错误的报文数
    pub malformed_messages: AtomicU64,
    /// 接受的生产者连接数（TCP）或启动的生产者进程数（pipe）
    pub connections_accepted: AtomicU64,
    /// 已有生产者时被拒绝的连接数
    pub connections_rejected: AtomicU64,
    /// 生产者断开次数
    pub disconnects: AtomicU64,
    /// socket / 进程 I/O 错误次数
    pub io_errors: AtomicU64,
}

impl IngressMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngressMetricsSnapshot {
        IngressMetricsSnapshot {
            samples_published: self.samples_published.load(Ordering::Relaxed),
            mailbox_overwrites: self.mailbox_overwrites.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressMetricsSnapshot {
    pub samples_published: u64,
    pub mailbox_overwrites: u64,
    pub malformed_messages: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub disconnects: u64,
    pub io_errors: u64,
}

impl fmt::Display for IngressMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} overwritten={} malformed={} accepted={} rejected={} disconnects={} io_errors={}",
            self.samples_published,
            self.mailbox_overwrites,
            self.malformed_messages,
            self.connections_accepted,
            self.connections_rejected,
            self.disconnects,
            self.io_errors
        )
    }
}
