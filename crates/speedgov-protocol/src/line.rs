//! 文本行协议
//!
//! 进程隔离模式下，外部生产者进程在 stdout 上逐行输出：
//!
//! ```text
//! DISTANCE:<float>\n
//! ```
//!
//! 不带前缀的行属于生产者自身的输出，调用方应忽略。

use crate::ProtocolError;
use crate::distance::DistanceSample;

/// 距离行前缀
pub const LINE_PREFIX: &str = "DISTANCE:";

/// 解析一行生产者输出
///
/// # 返回
/// - `Ok(Some(sample))`: 距离行
/// - `Ok(None)`: 非距离行（无前缀）
/// - `Err(ProtocolError::MalformedLine)`: 有前缀但数值无法解析
pub fn parse_line(line: &str) -> Result<Option<DistanceSample>, ProtocolError> {
    let Some(value) = line.trim().strip_prefix(LINE_PREFIX) else {
        return Ok(None);
    };

    let meters: f32 = value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedLine(line.trim().to_string()))?;

    DistanceSample::from_meters(meters).map(Some)
}

/// 格式化一行距离输出（保留两位小数）
pub fn format_line(meters: f32) -> String {
    format!("{}{:.2}\n", LINE_PREFIX, meters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distance_line() {
        let sample = parse_line("DISTANCE:1.25\n").unwrap().unwrap();
        assert_eq!(sample.meters(), 1.25);
    }

    #[test]
    fn test_parse_ignores_other_output() {
        assert_eq!(parse_line("Received 12 packets in the last second."), Ok(None));
        assert_eq!(parse_line(""), Ok(None));
    }

    #[test]
    fn test_parse_rejects_garbage_value() {
        let err = parse_line("DISTANCE:abc").unwrap_err();
        assert_eq!(err, ProtocolError::MalformedLine("DISTANCE:abc".to_string()));
    }

    #[test]
    fn test_parse_rejects_nan() {
        assert!(matches!(
            parse_line("DISTANCE:NaN"),
            Err(ProtocolError::NonFinite(_))
        ));
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(0.3), "DISTANCE:0.30\n");
        assert_eq!(parse_line(&format_line(-1.0)).unwrap().unwrap().meters(), -1.0);
    }
}
