//! 距离样本与 4 字节报文编解码

use crate::ProtocolError;
use std::fmt;

/// 单条距离报文长度（字节）
pub const DISTANCE_FRAME_LEN: usize = 4;

/// 距离样本（米）
///
/// 负值是哨兵值，表示"尚无读数 / 传感器无效"。
/// 只有最新的一条样本有意义，从不持久化。
///
/// # 设计特性
///
/// - **Copy trait**：单个 `f32`，适合邮箱覆盖写入
/// - **有限值**：解码时拒绝 NaN/Inf，构造后的样本总是有限值
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DistanceSample(f32);

impl DistanceSample {
    /// "无读数"哨兵值
    pub const UNKNOWN: DistanceSample = DistanceSample(-1.0);

    /// 从米数构造样本
    ///
    /// 非有限值会被拒绝，避免 NaN 绕过区间判断。
    pub fn from_meters(meters: f32) -> Result<Self, ProtocolError> {
        if meters.is_finite() {
            Ok(Self(meters))
        } else {
            Err(ProtocolError::NonFinite(meters))
        }
    }

    /// 距离（米）
    #[inline]
    pub fn meters(self) -> f32 {
        self.0
    }

    /// 是否为有效读数（非负）
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0.0
    }
}

impl Default for DistanceSample {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for DistanceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} m", self.0)
    }
}

/// 解码一条完整报文（数据报边界即报文边界）
///
/// # 错误
/// - `ProtocolError::InvalidLength`: 长度不是 4 字节
/// - `ProtocolError::NonFinite`: 解码出 NaN/Inf
pub fn decode_datagram(payload: &[u8]) -> Result<DistanceSample, ProtocolError> {
    let bytes: [u8; DISTANCE_FRAME_LEN] =
        payload.try_into().map_err(|_| ProtocolError::InvalidLength {
            expected: DISTANCE_FRAME_LEN,
            actual: payload.len(),
        })?;
    DistanceSample::from_meters(f32::from_le_bytes(bytes))
}

/// 编码距离样本（生产者侧 / 测试使用）
pub fn encode_sample(meters: f32) -> [u8; DISTANCE_FRAME_LEN] {
    meters.to_le_bytes()
}
