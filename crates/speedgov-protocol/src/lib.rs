//! # Speed Governor Protocol
//!
//! 距离遥测的线协议定义（无网络依赖）
//!
//! ## 模块
//!
//! - `distance`: 距离样本类型与 4 字节报文编解码
//! - `framer`: 面向连接传输（TCP）的显式分帧器
//! - `line`: 进程隔离生产者使用的 `DISTANCE:<value>` 文本行协议
//!
//! ## 字节序
//!
//! 每条报文为单个 IEEE-754 单精度浮点数，**小端字节序**，无分隔符、无长度前缀。

pub mod distance;
pub mod framer;
pub mod line;

pub use distance::{DISTANCE_FRAME_LEN, DistanceSample, decode_datagram, encode_sample};
pub use framer::StreamFramer;
pub use line::{LINE_PREFIX, format_line, parse_line};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid message length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Non-finite distance value: {0}")]
    NonFinite(f32),

    #[error("Malformed line: {0:?}")]
    MalformedLine(String),
}
