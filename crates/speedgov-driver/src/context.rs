//! 共享上下文
//!
//! 启动时构造一次，以 `Arc` 传入每个线程；没有模块级全局变量。

use crate::mailbox::Mailbox;
use crate::metrics::IngressMetrics;
use crate::shutdown::ShutdownSignal;
use speedgov_protocol::DistanceSample;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// 生产者连接状态
///
/// 只由接入线程写入，控制线程只读。
/// `epoch` 每次连接时递增，读取方据此发现"断开后又立即重连"。
#[derive(Debug, Default)]
pub struct ProducerAttachment {
    attached: AtomicBool,
    epoch: AtomicU64,
}

impl ProducerAttachment {
    /// 标记已连接，返回新的连接代数
    pub fn attach(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.attached.store(true, Ordering::Release);
        trace!("Producer attached (epoch {})", epoch);
        epoch
    }

    /// 标记已断开，返回之前是否处于连接状态
    pub fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// 当前连接代数（0 表示从未连接）
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// 调速器共享上下文
#[derive(Debug, Default)]
pub struct GovernorContext {
    /// 最新距离样本（接入线程 → 控制线程）
    pub distance: Mailbox<DistanceSample>,
    pub attachment: ProducerAttachment,
    pub metrics: IngressMetrics,
    pub shutdown: ShutdownSignal,
}

impl GovernorContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 使用外部创建的取消标志（例如 Ctrl+C 处理器先于上下文注册）
    pub fn with_shutdown(shutdown: ShutdownSignal) -> Arc<Self> {
        Arc::new(Self {
            shutdown,
            ..Default::default()
        })
    }

    /// 发布样本并更新计数
    pub fn publish(&self, sample: DistanceSample) {
        if self.distance.publish(sample) {
            IngressMetrics::incr(&self.metrics.mailbox_overwrites);
        }
        IngressMetrics::incr(&self.metrics.samples_published);
    }

    /// 生产者断开：清除连接状态和未读样本
    ///
    /// 旧连接的读数不会在重连后生效。
    pub fn producer_detached(&self) {
        if self.attachment.detach() {
            IngressMetrics::incr(&self.metrics.disconnects);
        }
        self.distance.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_epoch() {
        let attachment = ProducerAttachment::default();
        assert!(!attachment.is_attached());
        assert_eq!(attachment.epoch(), 0);

        assert_eq!(attachment.attach(), 1);
        assert!(attachment.is_attached());
        assert!(attachment.detach());
        assert!(!attachment.detach());
        assert_eq!(attachment.attach(), 2);
    }

    #[test]
    fn test_detach_clears_mailbox() {
        let ctx = GovernorContext::new();
        ctx.attachment.attach();
        ctx.publish(DistanceSample::from_meters(0.3).unwrap());
        ctx.publish(DistanceSample::from_meters(0.4).unwrap());

        ctx.producer_detached();
        assert!(!ctx.attachment.is_attached());
        assert_eq!(ctx.distance.try_take_latest(), None);

        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.samples_published, 2);
        assert_eq!(snap.mailbox_overwrites, 1);
        assert_eq!(snap.disconnects, 1);
    }
}
