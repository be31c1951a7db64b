//! # Speed Governor Tools - 纯函数与配置模型
//!
//! **依赖原则**: 只依赖 `speedgov-protocol`，不做任何网络或线程操作
//!
//! ## 包含模块
//!
//! - `policy` - 距离 → 速度比例映射（纯函数）
//! - `config` - 主配置文件与外部 recipe 文件（TOML）

pub mod config;
pub mod policy;

// 重新导出常用类型
pub use config::{
    ConfigError, GovernorConfig, IngressSection, OverrideSection, ReconnectSection, Recipe,
    ResolvedConfig, RobotSection, SignalSpec, SignalType, TransportKind,
};
pub use policy::{PolicyError, SpeedBand, SpeedFraction, SpeedPolicy, map_distance};
