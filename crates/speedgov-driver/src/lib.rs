//! # Speed Governor Driver
//!
//! 共享上下文原语与距离接入层。
//!
//! ## 模块
//!
//! - `mailbox`: 单槽、覆盖写入的最新值邮箱
//! - `shutdown`: 进程级单调取消标志 + 唤醒
//! - `context`: 接入线程与控制线程共享的上下文（邮箱、连接状态、取消标志、指标）
//! - `metrics`: 接入统计（原子计数器）
//! - `ingress`: 距离接入监听器（TCP / UDP / 子进程管道）
//!
//! ## 线程模型
//!
//! 接入线程是邮箱的唯一生产者、连接状态的唯一写入者；
//! 控制线程是邮箱的唯一消费者。除这三个原语外没有跨线程共享的可变状态。

pub mod context;
pub mod error;
pub mod ingress;
pub mod mailbox;
pub mod metrics;
pub mod shutdown;

pub use context::{GovernorContext, ProducerAttachment};
pub use error::DriverError;
pub use ingress::{IngressConfig, IngressListener, IngressTransport};
pub use mailbox::Mailbox;
pub use metrics::{IngressMetrics, IngressMetricsSnapshot};
pub use shutdown::{ShutdownReason, ShutdownSignal};
