//! # 速度映射策略
//!
//! 距离（米）→ 允许的最大速度比例 `[0.0, 1.0]`。
//!
//! 区间下界包含、上界不包含，不做滞回，也不做限速；
//! 去抖由链路控制器负责。

use serde::{Deserialize, Serialize};
use speedgov_protocol::DistanceSample;
use std::fmt;
use thiserror::Error;

/// 策略配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Speed fraction out of range [0, 1]: {0}")]
    FractionOutOfRange(f64),

    #[error("Policy has no bands")]
    Empty,

    #[error("First band must start at 0.0 m, got {0}")]
    FirstBandNotZero(f32),

    #[error("Band lower bounds must be strictly ascending (band {index}: {lower_m} m)")]
    NotAscending { index: usize, lower_m: f32 },
}

/// 速度比例 `[0.0, 1.0]`
///
/// 构造时校验范围，之后总是合法值。
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct SpeedFraction(f64);

impl SpeedFraction {
    /// 停止（0%）
    pub const STOP: SpeedFraction = SpeedFraction(0.0);
    /// 全速（100%）
    pub const FULL: SpeedFraction = SpeedFraction(1.0);

    /// 创建速度比例
    ///
    /// # 错误
    /// NaN 或超出 `[0, 1]` 时返回 `PolicyError::FractionOutOfRange`
    pub fn new(value: f64) -> Result<Self, PolicyError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PolicyError::FractionOutOfRange(value))
        }
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// 百分比（四舍五入）
    #[inline]
    pub fn as_percent(self) -> u32 {
        (self.0 * 100.0).round() as u32
    }
}

impl TryFrom<f64> for SpeedFraction {
    type Error = PolicyError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SpeedFraction> for f64 {
    fn from(fraction: SpeedFraction) -> Self {
        fraction.0
    }
}

impl fmt::Display for SpeedFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent())
    }
}

/// 单个距离区间：`[lower_m, 下一个区间的 lower_m)` → `fraction`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedBand {
    /// 区间下界（米，包含）
    pub lower_m: f32,
    /// 区间内允许的速度比例
    pub fraction: SpeedFraction,
}

impl SpeedBand {
    const fn new(lower_m: f32, fraction: f64) -> Self {
        Self {
            lower_m,
            fraction: SpeedFraction(fraction),
        }
    }
}

/// 默认区间表
///
/// | 距离 d | 速度 |
/// |---|---|
/// | d < 0 | 100%（未知） |
/// | 0 ≤ d < 0.5 | 0% |
/// | 0.5 ≤ d < 1.0 | 25% |
/// | 1.0 ≤ d < 2.0 | 50% |
/// | 2.0 ≤ d < 3.0 | 70% |
/// | d ≥ 3.0 | 100% |
const DEFAULT_BANDS: [SpeedBand; 5] = [
    SpeedBand::new(0.0, 0.0),
    SpeedBand::new(0.5, 0.25),
    SpeedBand::new(1.0, 0.5),
    SpeedBand::new(2.0, 0.7),
    SpeedBand::new(3.0, 1.0),
];

/// 按默认区间表映射距离
///
/// 全函数、纯函数：任何输入都有确定输出。负值或 NaN 视为"无读数"，返回 1.0。
pub fn map_distance(meters: f32) -> f64 {
    if !(meters >= 0.0) {
        return 1.0;
    }
    if meters < 0.5 {
        0.0
    } else if meters < 1.0 {
        0.25
    } else if meters < 2.0 {
        0.5
    } else if meters < 3.0 {
        0.7
    } else {
        1.0
    }
}

/// 可配置的速度映射策略
///
/// # Example
///
/// ```
/// use speedgov_protocol::DistanceSample;
/// use speedgov_tools::SpeedPolicy;
///
/// let policy = SpeedPolicy::default();
/// let sample = DistanceSample::from_meters(0.75).unwrap();
/// assert_eq!(policy.map(sample).value(), 0.25);
/// assert_eq!(policy.map(DistanceSample::UNKNOWN).value(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedPolicy {
    bands: Vec<SpeedBand>,
    unknown: SpeedFraction,
}

impl SpeedPolicy {
    /// 从区间列表创建策略
    ///
    /// # 错误
    /// - 区间为空
    /// - 第一个区间不从 0.0 开始
    /// - 下界不严格递增（含 NaN）
    pub fn from_bands(bands: Vec<SpeedBand>) -> Result<Self, PolicyError> {
        let first = bands.first().ok_or(PolicyError::Empty)?;
        if first.lower_m != 0.0 {
            return Err(PolicyError::FirstBandNotZero(first.lower_m));
        }
        for (index, pair) in bands.windows(2).enumerate() {
            // 用 `!(a < b)` 同时拒绝 NaN
            if !(pair[0].lower_m < pair[1].lower_m) {
                return Err(PolicyError::NotAscending {
                    index: index + 1,
                    lower_m: pair[1].lower_m,
                });
            }
        }
        Ok(Self {
            bands,
            unknown: SpeedFraction::FULL,
        })
    }

    /// 映射距离样本到速度比例
    pub fn map(&self, sample: DistanceSample) -> SpeedFraction {
        if !sample.is_valid() {
            return self.unknown;
        }
        let meters = sample.meters();
        // 最后一个下界 <= d 的区间
        self.bands
            .iter()
            .rev()
            .find(|band| band.lower_m <= meters)
            .map(|band| band.fraction)
            .unwrap_or(SpeedFraction::STOP)
    }

    pub fn bands(&self) -> &[SpeedBand] {
        &self.bands
    }

    /// 区间表的可读描述（`check` 子命令打印）
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("d < 0.00 m (unknown) -> {}", self.unknown)];
        for (i, band) in self.bands.iter().enumerate() {
            let line = match self.bands.get(i + 1) {
                Some(next) => format!(
                    "{:.2} m <= d < {:.2} m -> {}",
                    band.lower_m, next.lower_m, band.fraction
                ),
                None => format!("d >= {:.2} m -> {}", band.lower_m, band.fraction),
            };
            lines.push(line);
        }
        lines
    }
}

impl Default for SpeedPolicy {
    fn default() -> Self {
        Self {
            bands: DEFAULT_BANDS.to_vec(),
            unknown: SpeedFraction::FULL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(meters: f32) -> DistanceSample {
        DistanceSample::from_meters(meters).unwrap()
    }

    #[test]
    fn test_boundaries_are_lower_inclusive() {
        let policy = SpeedPolicy::default();
        assert_eq!(policy.map(sample(0.0)).value(), 0.0);
        assert_eq!(policy.map(sample(0.5)).value(), 0.25);
        assert_eq!(policy.map(sample(1.0)).value(), 0.5);
        assert_eq!(policy.map(sample(2.0)).value(), 0.7);
        assert_eq!(policy.map(sample(3.0)).value(), 1.0);
    }

    #[test]
    fn test_negative_is_unknown() {
        let policy = SpeedPolicy::default();
        assert_eq!(policy.map(sample(-5.0)).value(), 1.0);
        assert_eq!(map_distance(-5.0), 1.0);
        assert_eq!(map_distance(f32::NAN), 1.0);
    }

    #[test]
    fn test_just_below_boundary() {
        assert_eq!(map_distance(0.499_999), 0.0);
        assert_eq!(map_distance(0.999_999), 0.25);
        assert_eq!(map_distance(1.999_999), 0.5);
        assert_eq!(map_distance(2.999_999), 0.7);
    }

    #[test]
    fn test_fraction_range() {
        assert!(SpeedFraction::new(0.0).is_ok());
        assert!(SpeedFraction::new(1.0).is_ok());
        assert_eq!(
            SpeedFraction::new(1.5),
            Err(PolicyError::FractionOutOfRange(1.5))
        );
        assert!(SpeedFraction::new(f64::NAN).is_err());
        assert_eq!(SpeedFraction::new(0.7).unwrap().as_percent(), 70);
        assert_eq!(format!("{}", SpeedFraction::new(0.25).unwrap()), "25%");
    }

    #[test]
    fn test_custom_bands() {
        let policy = SpeedPolicy::from_bands(vec![
            SpeedBand::new(0.0, 0.1),
            SpeedBand::new(1.5, 1.0),
        ])
        .unwrap();
        assert_eq!(policy.map(sample(0.2)).value(), 0.1);
        assert_eq!(policy.map(sample(1.5)).value(), 1.0);
    }

    #[test]
    fn test_invalid_bands() {
        assert_eq!(SpeedPolicy::from_bands(vec![]), Err(PolicyError::Empty));
        assert_eq!(
            SpeedPolicy::from_bands(vec![SpeedBand::new(0.2, 0.0)]),
            Err(PolicyError::FirstBandNotZero(0.2))
        );
        assert_eq!(
            SpeedPolicy::from_bands(vec![
                SpeedBand::new(0.0, 0.0),
                SpeedBand::new(1.0, 0.5),
                SpeedBand::new(1.0, 0.7),
            ]),
            Err(PolicyError::NotAscending {
                index: 2,
                lower_m: 1.0
            })
        );
    }

    #[test]
    fn test_describe_default() {
        let lines = SpeedPolicy::default().describe();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "d < 0.00 m (unknown) -> 100%");
        assert_eq!(lines[2], "0.50 m <= d < 1.00 m -> 25%");
        assert_eq!(lines[5], "d >= 3.00 m -> 100%");
    }

    proptest! {
        #[test]
        fn band_0_stop(d in 0.0f32..0.5) {
            prop_assert_eq!(map_distance(d), 0.0);
        }

        #[test]
        fn band_1_quarter(d in 0.5f32..1.0) {
            prop_assert_eq!(map_distance(d), 0.25);
        }

        #[test]
        fn band_2_half(d in 1.0f32..2.0) {
            prop_assert_eq!(map_distance(d), 0.5);
        }

        #[test]
        fn band_3_seventy(d in 2.0f32..3.0) {
            prop_assert_eq!(map_distance(d), 0.7);
        }

        #[test]
        fn band_4_full(d in 3.0f32..1.0e6) {
            prop_assert_eq!(map_distance(d), 1.0);
        }

        #[test]
        fn negative_is_full(d in -1.0e6f32..-f32::MIN_POSITIVE) {
            prop_assert_eq!(map_distance(d), 1.0);
        }

        /// 默认策略与默认区间表逐点一致
        #[test]
        fn default_policy_matches_table(d in -10.0f32..10.0) {
            let policy = SpeedPolicy::default();
            prop_assert_eq!(policy.map(sample(d)).value(), map_distance(d));
        }
    }
}
