//! 链路控制器错误类型
//!
//! 每种失败映射为一个具名结果：瞬时链路错误在状态机内部重试，
//! 其余变体都会终止调速器。

use crate::session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// 瞬时链路错误（连接被拒、失步），重新建立会话后可恢复
    #[error("Transient link error: {0}")]
    TransientLink(#[source] SessionError),

    /// 信号契约无效 / 协商失败，无法安全运行
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    /// 连接重试预算耗尽
    #[error("Could not connect to {host}:{port} after {attempts} attempts: {last}")]
    ConnectBudgetExhausted {
        host: String,
        port: u16,
        attempts: u32,
        #[source]
        last: SessionError,
    },

    /// 连续链路故障超过预算
    #[error("Robot link failed {failures} consecutive times (budget {budget}): {last}")]
    LinkBudgetExhausted {
        failures: u32,
        budget: u32,
        #[source]
        last: SessionError,
    },
}

impl LinkError {
    /// 是否终止调速器
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::TransientLink(_))
    }
}
