//! 面向连接传输的显式分帧
//!
//! TCP 是字节流，不保证一次读取恰好对应一条 4 字节报文。
//! `StreamFramer` 缓存任意边界的读取结果，并按 4 字节切出完整报文。

use crate::ProtocolError;
use crate::distance::{DISTANCE_FRAME_LEN, DistanceSample};
use bytes::{Buf, BytesMut};

/// 流式分帧器
///
/// # Example
///
/// ```
/// use speedgov_protocol::StreamFramer;
///
/// let mut framer = StreamFramer::new();
/// let bytes = 1.5f32.to_le_bytes();
///
/// // 两次读取各带来半条报文
/// framer.push(&bytes[..2]);
/// assert!(framer.next_sample().is_none());
/// framer.push(&bytes[2..]);
/// assert_eq!(framer.next_sample().unwrap().unwrap().meters(), 1.5);
/// ```
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
}

impl StreamFramer {
    /// 创建空分帧器
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// 追加一次读取得到的字节
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 取出下一条完整报文
    ///
    /// # 返回
    /// - `None`: 缓冲区不足 4 字节
    /// - `Some(Ok(sample))`: 解码成功
    /// - `Some(Err(_))`: 报文解码出非有限值（该 4 字节已被消费）
    pub fn next_sample(&mut self) -> Option<Result<DistanceSample, ProtocolError>> {
        if self.buf.len() < DISTANCE_FRAME_LEN {
            return None;
        }
        let mut frame = self.buf.split_to(DISTANCE_FRAME_LEN);
        Some(DistanceSample::from_meters(frame.get_f32_le()))
    }

    /// 缓冲区中尚未组成完整报文的字节数
    #[inline]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// 丢弃残余字节，返回丢弃的字节数
    pub fn clear(&mut self) -> usize {
        let discarded = self.buf.len();
        self.buf.clear();
        discarded
    }
}
