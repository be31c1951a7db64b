//! 运动控制器会话能力
//!
//! 会话的协商细节和数据包编码属于外部实现；链路控制器只依赖这里的 trait：
//!
//! 1. `SessionConnector::open(host, port)`
//! 2. `negotiate_recipe(inputs, outputs, hz)` → 输入状态句柄
//! 3. `start()`
//! 4. 每个节拍 `receive()` / 按需 `send(input)`
//! 5. 结束时 `pause()` + `close()`

use crate::signal::SignalState;
use speedgov_tools::{SignalSpec, SignalType};
use thiserror::Error;

/// 会话错误
#[derive(Error, Debug)]
pub enum SessionError {
    /// 连接被拒绝 / 不可达
    #[error("Connection refused: {0}")]
    Refused(String),

    /// 会话中途失去连接
    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 控制器拒绝 recipe
    #[error("Recipe rejected: {0}")]
    RecipeRejected(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Signal '{name}' has type {expected}, got {actual}")]
    SignalTypeMismatch {
        name: String,
        expected: SignalType,
        actual: SignalType,
    },

    /// 控制器拒绝开始数据交换
    #[error("Start of exchange rejected")]
    StartRejected,

    #[error("Session protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// 是否为链路层故障（重新建立会话可能恢复）
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            SessionError::Refused(_) | SessionError::LinkLost(_) | SessionError::Io(_)
        )
    }
}

/// 已打开的会话
///
/// 由链路控制器独占，从不共享。
pub trait MotionSession: Send {
    /// 协商信号契约与采样频率，返回输入状态句柄（所有字段为零值）
    fn negotiate_recipe(
        &mut self,
        inputs: &[SignalSpec],
        outputs: &[SignalSpec],
        frequency_hz: f64,
    ) -> Result<SignalState, SessionError>;

    /// 开始数据交换
    fn start(&mut self) -> Result<(), SessionError>;

    /// 取一个输出状态；`Ok(None)` 表示本节拍暂无数据
    fn receive(&mut self) -> Result<Option<SignalState>, SessionError>;

    /// 写入输入状态
    fn send(&mut self, input: &SignalState) -> Result<(), SessionError>;

    /// 暂停数据交换，释放对控制器的覆盖
    fn pause(&mut self) -> Result<(), SessionError>;

    /// 关闭会话（幂等）
    fn close(&mut self);
}

/// 会话工厂
pub trait SessionConnector: Send {
    type Session: MotionSession;

    fn open(&mut self, host: &str, port: u16) -> Result<Self::Session, SessionError>;
}
