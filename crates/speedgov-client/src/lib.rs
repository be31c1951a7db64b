//! # Speed Governor Client
//!
//! 机器人链路控制器：管理与外部运动控制器的会话生命周期，
//! 每个控制节拍把最新距离映射为速度比例并写入会话。
//!
//! ## 模块
//!
//! - `session`: 运动控制器会话能力（trait），实现方负责线上编码
//! - `signal`: recipe 协商得到的具名、带类型的信号状态
//! - `monitor`: 失步检测（距上次收到状态的时长）
//! - `controller`: 链路状态机 + 控制节拍
//! - `sim`: 内存模拟的运动控制器（测试与无后端运行）
//! - `governor`: 线程编排（接入线程 + 链路线程）
//!
//! ## 状态机
//!
//! ```text
//! Disconnected → Connecting → ConfiguringRecipe → Synchronizing → Streaming
//!       ↑                                              │              │
//!       └──────────────── 链路故障（退避重试）─────────┴──────────────┘
//!                                                   取消 → Stopped
//! ```

pub mod controller;
pub mod error;
pub mod governor;
pub mod monitor;
pub mod session;
pub mod signal;
pub mod sim;

pub use controller::{GovernorStatus, LinkConfig, LinkController, LinkState, ReconnectPolicy};
pub use error::LinkError;
pub use governor::{GovernorError, GovernorExit, GovernorHandle};
pub use monitor::SyncMonitor;
pub use session::{MotionSession, SessionConnector, SessionError};
pub use signal::{SignalState, SignalValue};
pub use sim::{SimulatedConnector, SimulatedRobot};
