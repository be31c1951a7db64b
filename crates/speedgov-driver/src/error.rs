//! 驱动层错误类型定义

use speedgov_protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// 驱动层错误类型
///
/// 只覆盖接入层的启动/致命错误；单条报文错误、对端断开等瞬时错误
/// 在接入循环内部处理，不会以 `DriverError` 形式返回。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 监听地址绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// 事件循环 / socket 初始化错误
    #[error("Socket setup error: {0}")]
    Socket(#[from] std::io::Error),

    /// 生产者子进程启动失败
    #[error("Failed to spawn producer '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 辅助线程启动失败
    #[error("Failed to spawn thread '{name}': {source}")]
    Thread {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 生产者子进程重启次数耗尽
    #[error("Producer process exited too many times (restart budget: {0})")]
    RestartBudgetExhausted(u32),

    /// 无效配置（如空命令）
    #[error("Invalid ingress configuration: {0}")]
    InvalidConfig(String),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use speedgov_protocol::ProtocolError;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::RestartBudgetExhausted(3);
        assert_eq!(
            format!("{}", err),
            "Producer process exited too many times (restart budget: 3)"
        );

        let err = DriverError::Bind {
            addr: "127.0.0.1:13750".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(format!("{}", err).starts_with("Failed to bind 127.0.0.1:13750"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::InvalidLength {
            expected: 4,
            actual: 3,
        }
        .into();
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
