//! # 配置模型
//!
//! 主配置文件（TOML）+ 外部 recipe 文件（TOML）。
//!
//! ```toml
//! [ingress]
//! transport = "tcp"
//! listen = "0.0.0.0:13750"
//!
//! [robot]
//! host = "10.4.1.87"
//! recipe = "recipe.toml"
//!
//! [override]
//! detached_fraction = 1.0
//! ```
//!
//! recipe 路径相对于主配置文件所在目录解析。
//! 缺失或格式错误都是启动期致命错误。

use crate::policy::{PolicyError, SpeedBand, SpeedFraction, SpeedPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 配置错误（启动期，全部致命）
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid speed policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Recipe input '{name}' is missing (expected type {expected})")]
    MissingSignal { name: String, expected: SignalType },

    #[error("Recipe signal '{name}' has type {actual}, expected {expected}")]
    SignalTypeMismatch {
        name: String,
        expected: SignalType,
        actual: SignalType,
    },

    #[error("Duplicate recipe signal name: {0}")]
    DuplicateSignal(String),
}

// ============================================================================
// 主配置
// ============================================================================

/// 距离接入传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// 面向连接，同一时刻只接受一个生产者
    #[default]
    Tcp,
    /// 无连接数据报，任意发送方
    Udp,
    /// 子进程 stdout 行协议
    Pipe,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Pipe => "pipe",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            "pipe" => Ok(TransportKind::Pipe),
            other => Err(format!(
                "unknown transport '{}' (expected tcp, udp or pipe)",
                other
            )),
        }
    }
}

/// `[ingress]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressSection {
    pub transport: TransportKind,
    pub listen: SocketAddr,
    /// 有界等待时长（毫秒），也是取消响应的上限
    pub poll_interval_ms: u64,
    /// socket 接收缓冲区；缺省时 TCP 64 KiB、UDP 1 MiB
    pub recv_buffer_bytes: Option<usize>,
    /// socket 错误后的退避（毫秒）
    pub error_backoff_ms: u64,
    /// pipe 模式：生产者命令（argv）
    pub command: Vec<String>,
    /// pipe 模式：子进程意外退出后的重启次数上限
    pub restart_budget: u32,
}

impl Default for IngressSection {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            listen: SocketAddr::from(([0, 0, 0, 0], 13750)),
            poll_interval_ms: 1000,
            recv_buffer_bytes: None,
            error_backoff_ms: 1000,
            command: Vec::new(),
            restart_budget: 5,
        }
    }
}

impl IngressSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// 实际使用的接收缓冲区大小
    pub fn effective_recv_buffer(&self) -> usize {
        self.recv_buffer_bytes.unwrap_or(match self.transport {
            TransportKind::Udp => 1024 * 1024,
            TransportKind::Tcp | TransportKind::Pipe => 64 * 1024,
        })
    }
}

/// `[robot]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobotSection {
    /// 运动控制器地址（必填）
    pub host: String,
    #[serde(default = "default_robot_port")]
    pub port: u16,
    /// 采样频率（Hz），也是控制节拍
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: f64,
    /// recipe 文件路径（必填）
    pub recipe: PathBuf,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_interval_ms")]
    pub connect_interval_ms: u64,
    /// 连续无数据超过该时长视为失步
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

fn default_robot_port() -> u16 {
    30004
}

fn default_frequency_hz() -> f64 {
    125.0
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_interval_ms() -> u64 {
    2000
}

fn default_sync_timeout_ms() -> u64 {
    1000
}

impl RobotSection {
    /// 控制节拍周期
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// `[override]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideSection {
    /// 覆盖使能字段（UINT32）
    pub enable_field: String,
    /// 覆盖比例字段（DOUBLE）
    pub fraction_field: String,
    /// 生产者未连接时使用的速度比例
    pub detached_fraction: f64,
}

impl Default for OverrideSection {
    fn default() -> Self {
        Self {
            enable_field: "speed_slider_mask".to_string(),
            fraction_field: "speed_slider_fraction".to_string(),
            detached_fraction: 1.0,
        }
    }
}

/// `[reconnect]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSection {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 连续链路故障上限，超过即致命
    pub link_failure_budget: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            link_failure_budget: 10,
        }
    }
}

/// `[policy]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    /// 为空时使用默认区间表
    pub bands: Vec<SpeedBand>,
}

/// 主配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernorConfig {
    #[serde(default)]
    pub ingress: IngressSection,
    pub robot: RobotSection,
    #[serde(default, rename = "override")]
    pub speed_override: OverrideSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub policy: PolicySection,
}

impl GovernorConfig {
    /// 从 TOML 文本解析（不校验）
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// 读取并校验主配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let config = Self::from_toml_str(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let robot = &self.robot;
        if robot.host.trim().is_empty() {
            return Err(invalid("robot.host must not be empty"));
        }
        if robot.port == 0 {
            return Err(invalid("robot.port must be non-zero"));
        }
        if !(robot.frequency_hz > 0.0 && robot.frequency_hz <= 500.0) {
            return Err(invalid(format!(
                "robot.frequency_hz must be in (0, 500], got {}",
                robot.frequency_hz
            )));
        }
        if robot.connect_attempts == 0 {
            return Err(invalid("robot.connect_attempts must be at least 1"));
        }
        if robot.sync_timeout_ms == 0 {
            return Err(invalid("robot.sync_timeout_ms must be non-zero"));
        }

        let ingress = &self.ingress;
        if ingress.poll_interval_ms == 0 || ingress.poll_interval_ms > 1000 {
            return Err(invalid(format!(
                "ingress.poll_interval_ms must be in (0, 1000], got {}",
                ingress.poll_interval_ms
            )));
        }
        if ingress.transport == TransportKind::Pipe && ingress.command.is_empty() {
            return Err(invalid(
                "ingress.command is required when transport = \"pipe\"",
            ));
        }

        SpeedFraction::new(self.speed_override.detached_fraction)?;
        if self.speed_override.enable_field.is_empty()
            || self.speed_override.fraction_field.is_empty()
        {
            return Err(invalid("override field names must not be empty"));
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_backoff_ms == 0 || reconnect.max_backoff_ms < reconnect.initial_backoff_ms
        {
            return Err(invalid(
                "reconnect backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms",
            ));
        }
        if reconnect.link_failure_budget == 0 {
            return Err(invalid("reconnect.link_failure_budget must be at least 1"));
        }

        self.speed_policy()?;
        Ok(())
    }

    /// 构建速度映射策略（未配置区间时用默认表）
    pub fn speed_policy(&self) -> Result<SpeedPolicy, PolicyError> {
        if self.policy.bands.is_empty() {
            Ok(SpeedPolicy::default())
        } else {
            SpeedPolicy::from_bands(self.policy.bands.clone())
        }
    }

    /// 生产者未连接时的速度比例
    pub fn detached_fraction(&self) -> Result<SpeedFraction, PolicyError> {
        SpeedFraction::new(self.speed_override.detached_fraction)
    }
}

// ============================================================================
// Recipe
// ============================================================================

/// 信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Bool,
    Uint8,
    Uint32,
    Uint64,
    Int32,
    Double,
    Vector3d,
    Vector6d,
    Vector6Int32,
    Vector6Uint32,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalType::Bool => "BOOL",
            SignalType::Uint8 => "UINT8",
            SignalType::Uint32 => "UINT32",
            SignalType::Uint64 => "UINT64",
            SignalType::Int32 => "INT32",
            SignalType::Double => "DOUBLE",
            SignalType::Vector3d => "VECTOR3D",
            SignalType::Vector6d => "VECTOR6D",
            SignalType::Vector6Int32 => "VECTOR6INT32",
            SignalType::Vector6Uint32 => "VECTOR6UINT32",
        };
        f.write_str(name)
    }
}

/// 单个具名信号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SignalType,
}

/// 信号契约：调速器写入的 inputs + 可选读取的 outputs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    #[serde(default)]
    pub inputs: Vec<SignalSpec>,
    #[serde(default)]
    pub outputs: Vec<SignalSpec>,
}

impl Recipe {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn input(&self, name: &str) -> Option<&SignalSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&SignalSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    /// 校验信号契约
    ///
    /// - 同一方向内信号名唯一
    /// - 覆盖使能字段为 UINT32，覆盖比例字段为 DOUBLE
    pub fn validate(&self, overrides: &OverrideSection) -> Result<(), ConfigError> {
        for signals in [&self.inputs, &self.outputs] {
            let mut seen = HashSet::new();
            for signal in signals {
                if !seen.insert(signal.name.as_str()) {
                    return Err(ConfigError::DuplicateSignal(signal.name.clone()));
                }
            }
        }

        self.require_input(&overrides.enable_field, SignalType::Uint32)?;
        self.require_input(&overrides.fraction_field, SignalType::Double)?;
        Ok(())
    }

    fn require_input(&self, name: &str, expected: SignalType) -> Result<(), ConfigError> {
        match self.input(name) {
            None => Err(ConfigError::MissingSignal {
                name: name.to_string(),
                expected,
            }),
            Some(spec) if spec.kind != expected => Err(ConfigError::SignalTypeMismatch {
                name: name.to_string(),
                expected,
                actual: spec.kind,
            }),
            Some(_) => Ok(()),
        }
    }
}

// ============================================================================
// 完整解析结果
// ============================================================================

/// 主配置 + recipe，均已校验
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub governor: GovernorConfig,
    pub recipe: Recipe,
    /// recipe 实际路径
    pub recipe_path: PathBuf,
    pub policy: SpeedPolicy,
}

impl ResolvedConfig {
    /// 读取主配置并解析 recipe
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let governor = GovernorConfig::load(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::resolve(governor, base)
    }

    /// 以 `base_dir` 为基准解析 recipe 路径并完成校验
    pub fn resolve(governor: GovernorConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        governor.validate()?;

        let recipe_path = if governor.robot.recipe.is_absolute() {
            governor.robot.recipe.clone()
        } else {
            base_dir.join(&governor.robot.recipe)
        };
        let recipe = Recipe::load(&recipe_path)?;
        recipe.validate(&governor.speed_override)?;

        let policy = governor.speed_policy()?;
        Ok(Self {
            governor,
            recipe,
            recipe_path,
            policy,
        })
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
