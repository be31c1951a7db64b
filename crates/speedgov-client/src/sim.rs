//! 内存模拟的运动控制器
//!
//! 实现 `SessionConnector` / `MotionSession`，用于集成测试和未链接原生后端时运行。
//! `SimulatedRobot` 是可克隆的共享句柄：测试通过它注入故障、检查调速器写入了什么。
//!
//! 故障注入：
//! - `refuse_next_connects(n)`: 接下来 n 次 `open` 失败
//! - `set_link_down(true)`: 不可达，`open` 和已有会话的所有操作失败
//! - `drop_link()`: 断开现有会话（新会话不受影响）
//! - `reject_recipe(true)`: 拒绝 recipe
//! - `reject_next_starts(n)`: 接下来 n 次 `start` 失败
//! - `set_silent(true)`: `receive` 一直返回"无数据"

use crate::session::{MotionSession, SessionConnector, SessionError};
use crate::signal::{SignalState, SignalValue};
use parking_lot::Mutex;
use speedgov_tools::SignalSpec;
use std::sync::Arc;
use tracing::debug;

/// 默认覆盖比例字段名（记录发送值时读取）
const FRACTION_FIELD: &str = "speed_slider_fraction";

/// 输出中回显最近一次写入比例的字段
const SPEED_SCALING_FIELD: &str = "speed_scaling";

#[derive(Debug, Default)]
struct SimState {
    refuse_connects: u32,
    link_down: bool,
    link_generation: u64,
    reject_recipe: bool,
    reject_starts: u32,
    silent: bool,

    opens: u32,
    closes: u32,
    starts: u32,
    pauses: u32,
    sent: Vec<SignalState>,
    last_fraction: f64,
}

/// 模拟机器人（共享句柄）
#[derive(Debug, Clone, Default)]
pub struct SimulatedRobot {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRobot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector {
            robot: self.clone(),
        }
    }

    pub fn refuse_next_connects(&self, count: u32) {
        self.state.lock().refuse_connects = count;
    }

    pub fn set_link_down(&self, down: bool) {
        let mut state = self.state.lock();
        state.link_down = down;
        if down {
            state.link_generation += 1;
        }
    }

    /// 断开所有现有会话
    pub fn drop_link(&self) {
        self.state.lock().link_generation += 1;
    }

    pub fn reject_recipe(&self, reject: bool) {
        self.state.lock().reject_recipe = reject;
    }

    pub fn reject_next_starts(&self, count: u32) {
        self.state.lock().reject_starts = count;
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn opens(&self) -> u32 {
        self.state.lock().opens
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().closes
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn pauses(&self) -> u32 {
        self.state.lock().pauses
    }

    /// 所有写入的输入状态
    pub fn sent_states(&self) -> Vec<SignalState> {
        self.state.lock().sent.clone()
    }

    /// 每次写入的覆盖比例（`speed_slider_fraction`）
    pub fn sent_fractions(&self) -> Vec<f64> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|s| s.get(FRACTION_FIELD).and_then(SignalValue::as_f64))
            .collect()
    }

    pub fn last_fraction(&self) -> Option<f64> {
        self.sent_fractions().last().copied()
    }
}

/// 模拟会话工厂
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    robot: SimulatedRobot,
}

impl SimulatedConnector {
    pub fn new(robot: SimulatedRobot) -> Self {
        Self { robot }
    }
}

impl SessionConnector for SimulatedConnector {
    type Session = SimulatedSession;

    fn open(&mut self, host: &str, port: u16) -> Result<Self::Session, SessionError> {
        let mut state = self.robot.state.lock();
        if state.link_down {
            return Err(SessionError::Refused(format!("{}:{} unreachable", host, port)));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(SessionError::Refused(format!("{}:{} refused", host, port)));
        }
        state.opens += 1;
        debug!("Simulated robot: session opened to {}:{}", host, port);

        Ok(SimulatedSession {
            robot: self.robot.clone(),
            generation: state.link_generation,
            outputs: Vec::new(),
            negotiated: false,
            started: false,
            closed: false,
        })
    }
}

/// 模拟会话
#[derive(Debug)]
pub struct SimulatedSession {
    robot: SimulatedRobot,
    generation: u64,
    outputs: Vec<SignalSpec>,
    negotiated: bool,
    started: bool,
    closed: bool,
}

impl SimulatedSession {
    /// 会话仍然有效，否则返回链路错误
    fn check_link(&self, state: &SimState) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Protocol("session closed".into()));
        }
        if state.link_down || state.link_generation != self.generation {
            return Err(SessionError::LinkLost("simulated link dropped".into()));
        }
        Ok(())
    }
}

impl MotionSession for SimulatedSession {
    fn negotiate_recipe(
        &mut self,
        inputs: &[SignalSpec],
        outputs: &[SignalSpec],
        frequency_hz: f64,
    ) -> Result<SignalState, SessionError> {
        let state = self.robot.state.lock();
        self.check_link(&state)?;

        if state.reject_recipe {
            return Err(SessionError::RecipeRejected(
                "controller does not accept the requested signals".into(),
            ));
        }
        if !(frequency_hz > 0.0) {
            return Err(SessionError::RecipeRejected(format!(
                "invalid frequency {}",
                frequency_hz
            )));
        }

        self.outputs = outputs.to_vec();
        self.negotiated = true;
        Ok(SignalState::from_specs(inputs))
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let mut state = self.robot.state.lock();
        self.check_link(&state)?;
        if !self.negotiated {
            return Err(SessionError::Protocol("start before recipe negotiation".into()));
        }
        if state.reject_starts > 0 {
            state.reject_starts -= 1;
            return Err(SessionError::StartRejected);
        }
        state.starts += 1;
        self.started = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<SignalState>, SessionError> {
        let state = self.robot.state.lock();
        self.check_link(&state)?;
        if !self.started {
            return Err(SessionError::Protocol("receive before start".into()));
        }
        if state.silent {
            return Ok(None);
        }

        let mut output = SignalState::from_specs(&self.outputs);
        // 字段不存在或类型不符时忽略
        let _ = output.set(
            SPEED_SCALING_FIELD,
            SignalValue::Double(state.last_fraction),
        );
        Ok(Some(output))
    }

    fn send(&mut self, input: &SignalState) -> Result<(), SessionError> {
        let mut state = self.robot.state.lock();
        self.check_link(&state)?;
        if let Some(fraction) = input.get(FRACTION_FIELD).and_then(SignalValue::as_f64) {
            state.last_fraction = fraction;
        }
        state.sent.push(input.clone());
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        let mut state = self.robot.state.lock();
        self.check_link(&state)?;
        state.pauses += 1;
        self.started = false;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.robot.state.lock().closes += 1;
    }
}
