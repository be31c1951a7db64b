//! # 距离接入监听器
//!
//! 持有监听端点，把合法的线上报文转换为邮箱发布。
//!
//! | 传输 | 连接语义 | 报文边界 |
//! |---|---|---|
//! | TCP | 同一时刻一个生产者，连接期间视为已连接 | 显式 4 字节分帧 |
//! | UDP | 任意发送方，启动即视为已连接 | 数据报 |
//! | Pipe | 子进程 stdout 打开期间视为已连接 | `DISTANCE:<v>` 文本行 |
//!
//! 所有等待都是有界的（`poll_interval`），每轮检查取消标志。
//! 单条错误报文只记录日志并丢弃，从不致命。

mod pipe;
mod socket;
mod tcp;
mod udp;

pub use pipe::PipeIngress;
pub use tcp::TcpIngress;
pub use udp::UdpIngress;

use crate::context::GovernorContext;
use crate::error::DriverError;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// 接入传输方式及其端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressTransport {
    Tcp { listen: SocketAddr },
    Udp { listen: SocketAddr },
    /// 生产者命令（argv，第一个元素为程序）
    Pipe { command: Vec<String> },
}

impl fmt::Display for IngressTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressTransport::Tcp { listen } => write!(f, "tcp://{}", listen),
            IngressTransport::Udp { listen } => write!(f, "udp://{}", listen),
            IngressTransport::Pipe { command } => write!(f, "pipe:{}", command.join(" ")),
        }
    }
}

/// 接入配置
///
/// # Example
///
/// ```
/// use speedgov_driver::{IngressConfig, IngressTransport};
///
/// let config = IngressConfig {
///     transport: IngressTransport::Udp {
///         listen: "127.0.0.1:0".parse().unwrap(),
///     },
///     recv_buffer: 1024 * 1024,
///     ..Default::default()
/// };
/// assert_eq!(config.poll_interval.as_millis(), 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressConfig {
    pub transport: IngressTransport,
    /// 有界等待时长，取消后最多延迟这么久退出
    pub poll_interval: Duration,
    /// socket 接收缓冲区（字节）
    pub recv_buffer: usize,
    /// socket 错误 / 子进程退出后的退避
    pub error_backoff: Duration,
    /// 子进程意外退出后允许的重启次数
    pub restart_budget: u32,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            transport: IngressTransport::Tcp {
                listen: SocketAddr::from(([0, 0, 0, 0], 13750)),
            },
            poll_interval: Duration::from_secs(1),
            recv_buffer: 64 * 1024,
            error_backoff: Duration::from_secs(1),
            restart_budget: 5,
        }
    }
}

/// 已绑定的接入监听器
///
/// 绑定在调用线程完成（绑定失败是启动期致命错误），
/// 之后整体移动到接入线程中执行 `run()`。
#[derive(Debug)]
pub enum IngressListener {
    Tcp(TcpIngress),
    Udp(UdpIngress),
    Pipe(PipeIngress),
}

impl IngressListener {
    /// 按配置绑定监听端点
    pub fn bind(config: &IngressConfig) -> Result<Self, DriverError> {
        let listener = match &config.transport {
            IngressTransport::Tcp { listen } => {
                IngressListener::Tcp(TcpIngress::bind(*listen, config)?)
            },
            IngressTransport::Udp { listen } => {
                IngressListener::Udp(UdpIngress::bind(*listen, config)?)
            },
            IngressTransport::Pipe { command } => {
                IngressListener::Pipe(PipeIngress::new(command.clone(), config)?)
            },
        };
        info!("Distance ingress ready on {}", listener.describe());
        Ok(listener)
    }

    /// 实际绑定的地址（pipe 模式无地址）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            IngressListener::Tcp(tcp) => Some(tcp.local_addr()),
            IngressListener::Udp(udp) => Some(udp.local_addr()),
            IngressListener::Pipe(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            IngressListener::Tcp(tcp) => format!("tcp://{}", tcp.local_addr()),
            IngressListener::Udp(udp) => format!("udp://{}", udp.local_addr()),
            IngressListener::Pipe(pipe) => format!("pipe:{}", pipe.command_line()),
        }
    }

    /// 接入循环（阻塞直到请求关停或发生致命错误）
    ///
    /// 返回前总是清除连接状态。
    pub fn run(self, ctx: &GovernorContext) -> Result<(), DriverError> {
        let result = match self {
            IngressListener::Tcp(tcp) => tcp.run(ctx),
            IngressListener::Udp(udp) => udp.run(ctx),
            IngressListener::Pipe(pipe) => pipe.run(ctx),
        };
        ctx.producer_detached();
        info!("Distance ingress stopped ({})", ctx.metrics.snapshot());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display() {
        let tcp = IngressTransport::Tcp {
            listen: "0.0.0.0:13750".parse().unwrap(),
        };
        assert_eq!(tcp.to_string(), "tcp://0.0.0.0:13750");

        let pipe = IngressTransport::Pipe {
            command: vec!["python3".into(), "sensor.py".into()],
        };
        assert_eq!(pipe.to_string(), "pipe:python3 sensor.py");
    }

    #[test]
    fn test_bind_reports_ephemeral_port() {
        let config = IngressConfig {
            transport: IngressTransport::Tcp {
                listen: "127.0.0.1:0".parse().unwrap(),
            },
            ..Default::default()
        };
        let listener = IngressListener::bind(&config).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_empty_pipe_command_rejected() {
        let config = IngressConfig {
            transport: IngressTransport::Pipe { command: vec![] },
            ..Default::default()
        };
        assert!(matches!(
            IngressListener::bind(&config),
            Err(DriverError::InvalidConfig(_))
        ));
    }
}
