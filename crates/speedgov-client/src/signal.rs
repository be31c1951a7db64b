//! recipe 信号状态
//!
//! 协商成功后，会话交给调速器一个输入状态句柄；调速器只按名字读写字段，
//! 不关心会话的二进制编码。

use crate::session::SessionError;
use speedgov_tools::{SignalSpec, SignalType};
use std::fmt;

/// 单个信号的值
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    Bool(bool),
    Uint8(u8),
    Uint32(u32),
    Uint64(u64),
    Int32(i32),
    Double(f64),
    Vector3d([f64; 3]),
    Vector6d([f64; 6]),
    Vector6Int32([i32; 6]),
    Vector6Uint32([u32; 6]),
}

impl SignalValue {
    /// 指定类型的零值
    pub fn default_for(kind: SignalType) -> Self {
        match kind {
            SignalType::Bool => SignalValue::Bool(false),
            SignalType::Uint8 => SignalValue::Uint8(0),
            SignalType::Uint32 => SignalValue::Uint32(0),
            SignalType::Uint64 => SignalValue::Uint64(0),
            SignalType::Int32 => SignalValue::Int32(0),
            SignalType::Double => SignalValue::Double(0.0),
            SignalType::Vector3d => SignalValue::Vector3d([0.0; 3]),
            SignalType::Vector6d => SignalValue::Vector6d([0.0; 6]),
            SignalType::Vector6Int32 => SignalValue::Vector6Int32([0; 6]),
            SignalType::Vector6Uint32 => SignalValue::Vector6Uint32([0; 6]),
        }
    }

    pub fn kind(&self) -> SignalType {
        match self {
            SignalValue::Bool(_) => SignalType::Bool,
            SignalValue::Uint8(_) => SignalType::Uint8,
            SignalValue::Uint32(_) => SignalType::Uint32,
            SignalValue::Uint64(_) => SignalType::Uint64,
            SignalValue::Int32(_) => SignalType::Int32,
            SignalValue::Double(_) => SignalType::Double,
            SignalValue::Vector3d(_) => SignalType::Vector3d,
            SignalValue::Vector6d(_) => SignalType::Vector6d,
            SignalValue::Vector6Int32(_) => SignalType::Vector6Int32,
            SignalValue::Vector6Uint32(_) => SignalType::Vector6Uint32,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(v) => write!(f, "{}", v),
            SignalValue::Uint8(v) => write!(f, "{}", v),
            SignalValue::Uint32(v) => write!(f, "{}", v),
            SignalValue::Uint64(v) => write!(f, "{}", v),
            SignalValue::Int32(v) => write!(f, "{}", v),
            SignalValue::Double(v) => write!(f, "{:.4}", v),
            SignalValue::Vector3d(v) => write!(f, "{:?}", v),
            SignalValue::Vector6d(v) => write!(f, "{:?}", v),
            SignalValue::Vector6Int32(v) => write!(f, "{:?}", v),
            SignalValue::Vector6Uint32(v) => write!(f, "{:?}", v),
        }
    }
}

/// 一组具名信号（保持 recipe 中的顺序）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalState {
    fields: Vec<(String, SignalValue)>,
}

impl SignalState {
    /// 按 recipe 创建，所有字段为零值
    pub fn from_specs(specs: &[SignalSpec]) -> Self {
        Self {
            fields: specs
                .iter()
                .map(|spec| (spec.name.clone(), SignalValue::default_for(spec.kind)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// 写入字段（类型必须与协商结果一致）
    ///
    /// # 错误
    /// - `SessionError::UnknownSignal`: 字段不在 recipe 中
    /// - `SessionError::SignalTypeMismatch`: 类型不一致
    pub fn set(&mut self, name: &str, value: SignalValue) -> Result<(), SessionError> {
        let slot = self
            .fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, slot)| slot)
            .ok_or_else(|| SessionError::UnknownSignal(name.to_string()))?;

        if slot.kind() != value.kind() {
            return Err(SessionError::SignalTypeMismatch {
                name: name.to_string(),
                expected: slot.kind(),
                actual: value.kind(),
            });
        }
        *slot = value;
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<SignalSpec> {
        vec![
            SignalSpec {
                name: "speed_slider_mask".into(),
                kind: SignalType::Uint32,
            },
            SignalSpec {
                name: "speed_slider_fraction".into(),
                kind: SignalType::Double,
            },
        ]
    }

    #[test]
    fn test_from_specs_zeroed() {
        let state = SignalState::from_specs(&specs());
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("speed_slider_mask"), Some(&SignalValue::Uint32(0)));
        assert_eq!(
            state.names().collect::<Vec<_>>(),
            vec!["speed_slider_mask", "speed_slider_fraction"]
        );
    }

    #[test]
    fn test_set_checks_name_and_type() {
        let mut state = SignalState::from_specs(&specs());
        state
            .set("speed_slider_fraction", SignalValue::Double(0.25))
            .unwrap();
        assert_eq!(
            state.get("speed_slider_fraction").and_then(SignalValue::as_f64),
            Some(0.25)
        );

        assert!(matches!(
            state.set("speed_slider_mask", SignalValue::Double(1.0)),
            Err(SessionError::SignalTypeMismatch { .. })
        ));
        assert!(matches!(
            state.set("missing", SignalValue::Bool(true)),
            Err(SessionError::UnknownSignal(_))
        ));
    }

    #[test]
    fn test_default_kind_roundtrip() {
        for kind in [
            SignalType::Bool,
            SignalType::Uint8,
            SignalType::Uint64,
            SignalType::Int32,
            SignalType::Vector3d,
            SignalType::Vector6d,
            SignalType::Vector6Int32,
            SignalType::Vector6Uint32,
        ] {
            assert_eq!(SignalValue::default_for(kind).kind(), kind);
        }
    }
}
