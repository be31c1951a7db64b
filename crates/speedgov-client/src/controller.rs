//! # 机器人链路控制器
//!
//! 拥有与运动控制器的会话，按采样频率运行控制节拍：
//!
//! 1. 取一个输出状态，连续无数据超过 `sync_timeout` 视为失步
//! 2. 生产者未连接时使用断开回退比例，否则取最新距离（没有新值则沿用上一个）并映射
//! 3. 比例与已下发的不同才写入会话（去抖）
//!
//! 链路故障（连接被拒、失步、start 失败）关闭会话回到 `Disconnected`，
//! 按指数退避重试；连续故障超过预算即致命。首次建立会话之前连接重试耗尽即致命，
//! recipe 协商失败总是致命。

use crate::error::LinkError;
use crate::monitor::SyncMonitor;
use crate::session::{MotionSession, SessionConnector, SessionError};
use crate::signal::{SignalState, SignalValue};
use arc_swap::ArcSwap;
use speedgov_driver::GovernorContext;
use speedgov_protocol::DistanceSample;
use speedgov_tools::{PolicyError, Recipe, ResolvedConfig, SpeedFraction, SpeedPolicy};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, trace, warn};

/// 输出状态诊断字段
const DIAGNOSTIC_OUTPUTS: [&str; 2] = ["actual_TCP_speed", "target_TCP_speed"];

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    ConfiguringRecipe,
    Synchronizing,
    Streaming,
    /// 终态
    Stopped,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::ConfiguringRecipe => "ConfiguringRecipe",
            LinkState::Synchronizing => "Synchronizing",
            LinkState::Streaming => "Streaming",
            LinkState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// 重连退避策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 连续链路故障上限
    pub failure_budget: u32,
}

impl ReconnectPolicy {
    /// 第 `failures` 次连续故障后的退避（1 起算，翻倍，封顶）
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            failure_budget: 10,
        }
    }
}

/// 链路配置
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    /// 采样频率，也是控制节拍频率
    pub frequency_hz: f64,
    pub recipe: Recipe,
    /// 覆盖使能字段（UINT32）
    pub enable_field: String,
    /// 覆盖比例字段（DOUBLE）
    pub fraction_field: String,
    /// 生产者未连接时的比例
    pub detached_fraction: SpeedFraction,
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub sync_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl LinkConfig {
    /// 从已校验的配置构建
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, PolicyError> {
        let governor = &config.governor;
        Ok(Self {
            host: governor.robot.host.clone(),
            port: governor.robot.port,
            frequency_hz: governor.robot.frequency_hz,
            recipe: config.recipe.clone(),
            enable_field: governor.speed_override.enable_field.clone(),
            fraction_field: governor.speed_override.fraction_field.clone(),
            detached_fraction: governor.detached_fraction()?,
            connect_attempts: governor.robot.connect_attempts,
            connect_interval: governor.robot.connect_interval(),
            sync_timeout: governor.robot.sync_timeout(),
            reconnect: ReconnectPolicy {
                initial_backoff: Duration::from_millis(governor.reconnect.initial_backoff_ms),
                max_backoff: Duration::from_millis(governor.reconnect.max_backoff_ms),
                failure_budget: governor.reconnect.link_failure_budget,
            },
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }
}

/// 调速器状态快照（无锁发布）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GovernorStatus {
    pub state: LinkState,
    /// 当前会话中已下发的比例
    pub applied_fraction: Option<SpeedFraction>,
    /// 最近一次用于映射的距离
    pub last_distance: DistanceSample,
    pub producer_attached: bool,
    /// 链路故障后的重连次数
    pub reconnects: u64,
}

impl fmt::Display for GovernorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link={}", self.state)?;
        match self.applied_fraction {
            Some(fraction) => write!(f, " speed={}", fraction)?,
            None => write!(f, " speed=-")?,
        }
        write!(
            f,
            " distance={} producer={} reconnects={}",
            self.last_distance,
            if self.producer_attached { "attached" } else { "detached" },
            self.reconnects
        )
    }
}

/// 链路控制器
pub struct LinkController<C: SessionConnector> {
    connector: C,
    config: LinkConfig,
    policy: SpeedPolicy,
    ctx: Arc<GovernorContext>,
    status: Arc<ArcSwap<GovernorStatus>>,

    state: LinkState,
    session: Option<C::Session>,
    input: Option<SignalState>,
    /// 当前会话已下发的比例；`None` 表示下一个节拍必须发送
    applied: Option<SpeedFraction>,
    /// 沿用的距离样本
    held: DistanceSample,
    /// 已观察到的生产者连接代数
    seen_epoch: u64,
    monitor: SyncMonitor,
    consecutive_failures: u32,
    reconnects: u64,
    /// 是否曾进入过 Streaming（之后的连接失败属于可恢复的链路故障）
    established: bool,
}

impl<C: SessionConnector> LinkController<C> {
    pub fn new(
        connector: C,
        config: LinkConfig,
        policy: SpeedPolicy,
        ctx: Arc<GovernorContext>,
    ) -> Self {
        let monitor = SyncMonitor::new(config.sync_timeout);
        Self {
            connector,
            config,
            policy,
            ctx,
            status: Arc::new(ArcSwap::from_pointee(GovernorStatus::default())),
            state: LinkState::Disconnected,
            session: None,
            input: None,
            applied: None,
            held: DistanceSample::UNKNOWN,
            seen_epoch: 0,
            monitor,
            consecutive_failures: 0,
            reconnects: 0,
            established: false,
        }
    }

    /// 状态快照句柄（可在其他线程读取）
    pub fn status_handle(&self) -> Arc<ArcSwap<GovernorStatus>> {
        Arc::clone(&self.status)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn applied_fraction(&self) -> Option<SpeedFraction> {
        self.applied
    }

    /// 执行一步状态机
    ///
    /// 返回 `Ok(false)` 表示已进入 `Stopped`。致命错误时会话已关闭。
    pub fn step(&mut self) -> Result<bool, LinkError> {
        if self.state == LinkState::Stopped {
            return Ok(false);
        }
        if self.ctx.shutdown.is_requested() {
            self.stop();
            return Ok(false);
        }

        let result = match self.state {
            LinkState::Disconnected => {
                self.set_state(LinkState::Connecting);
                Ok(())
            },
            LinkState::Connecting => self.connect(),
            LinkState::ConfiguringRecipe => self.configure_recipe(),
            LinkState::Synchronizing => self.synchronize(),
            LinkState::Streaming => self.tick(),
            LinkState::Stopped => return Ok(false),
        };

        if let Err(e) = result {
            error!("Robot link: {}", e);
            self.close_session();
            self.set_state(LinkState::Stopped);
            self.publish_status();
            return Err(e);
        }
        self.publish_status();
        Ok(true)
    }

    /// 运行直到取消或致命错误
    ///
    /// Streaming 状态按固定周期节拍（绝对时间锚点），其余状态立即进入下一步。
    pub fn run(mut self) -> Result<(), LinkError> {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("Robot link thread priority set to MAX (realtime)"),
                Err(e) => warn!(
                    "Failed to set robot link thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                ),
            }
        }

        let period = self.config.period();
        let mut next_tick = Instant::now();

        loop {
            let was_streaming = self.state == LinkState::Streaming;
            if !self.step()? {
                break;
            }

            if !(was_streaming && self.state == LinkState::Streaming) {
                next_tick = Instant::now();
                continue;
            }

            next_tick += period;
            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            } else {
                debug!(
                    "Control tick overrun by {:?} (period {:?})",
                    now.duration_since(next_tick),
                    period
                );
                next_tick = now;
            }
        }

        info!("Robot link stopped ({})", self.status.load_full());
        Ok(())
    }

    // ------------------------------------------------------------------
    // 状态处理
    // ------------------------------------------------------------------

    fn connect(&mut self) -> Result<(), LinkError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            info!(
                "Connecting to robot {}:{} (attempt {}/{})",
                self.config.host, self.config.port, attempt, attempts
            );
            match self.connector.open(&self.config.host, self.config.port) {
                Ok(session) => {
                    info!("Connected to robot");
                    self.session = Some(session);
                    self.set_state(LinkState::ConfiguringRecipe);
                    return Ok(());
                },
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    last = Some(e);
                },
            }

            if attempt < attempts && self.ctx.shutdown.wait_timeout(self.config.connect_interval)
            {
                // 取消：下一步进入 Stopped
                return Ok(());
            }
        }

        let last = last.unwrap_or_else(|| SessionError::Refused("no attempt made".into()));
        if self.established {
            // 曾经建立过会话：按链路故障处理，由外层预算约束
            return self.link_failure(last);
        }
        Err(LinkError::ConnectBudgetExhausted {
            host: self.config.host.clone(),
            port: self.config.port,
            attempts,
            last,
        })
    }

    fn configure_recipe(&mut self) -> Result<(), LinkError> {
        let Some(session) = self.session.as_mut() else {
            self.set_state(LinkState::Disconnected);
            return Ok(());
        };

        let recipe = &self.config.recipe;
        debug!(
            "Negotiating recipe: inputs={:?} outputs={:?} @ {} Hz",
            recipe.input_names(),
            recipe.output_names(),
            self.config.frequency_hz
        );

        match session.negotiate_recipe(&recipe.inputs, &recipe.outputs, self.config.frequency_hz) {
            Ok(mut input) => {
                // 使能覆盖并从全速开始
                input
                    .set(&self.config.enable_field, SignalValue::Uint32(1))
                    .and_then(|_| {
                        input.set(
                            &self.config.fraction_field,
                            SignalValue::Double(SpeedFraction::FULL.value()),
                        )
                    })
                    .map_err(|e| LinkError::FatalConfig(format!("override fields: {}", e)))?;

                self.input = Some(input);
                self.applied = None;
                self.set_state(LinkState::Synchronizing);
                Ok(())
            },
            Err(e) if e.is_link_fault() => self.link_failure(e),
            Err(e) => Err(LinkError::FatalConfig(format!(
                "recipe negotiation failed: {}",
                e
            ))),
        }
    }

    fn synchronize(&mut self) -> Result<(), LinkError> {
        let Some(session) = self.session.as_mut() else {
            self.set_state(LinkState::Disconnected);
            return Ok(());
        };

        match session.start() {
            Ok(()) => {
                info!("Robot data exchange started");
                self.monitor.reset();
                self.established = true;
                self.set_state(LinkState::Streaming);
                Ok(())
            },
            Err(e) => self.link_failure(e),
        }
    }

    /// 一个控制节拍
    fn tick(&mut self) -> Result<(), LinkError> {
        let Some(session) = self.session.as_mut() else {
            self.set_state(LinkState::Disconnected);
            return Ok(());
        };

        match session.receive() {
            Ok(Some(output)) => {
                self.monitor.register_state();
                // 收到数据即视为链路恢复
                self.consecutive_failures = 0;
                log_output_diagnostics(&output);
            },
            Ok(None) => {
                if !self.monitor.is_synchronized() {
                    return self.link_failure(SessionError::LinkLost(format!(
                        "no data for {:?}",
                        self.monitor.time_since_last_state()
                    )));
                }
                trace!("No robot state this tick");
            },
            Err(e) => return self.link_failure(e),
        }

        let target = self.target_fraction();
        if self.applied == Some(target) {
            return Ok(());
        }

        let (Some(session), Some(input)) = (self.session.as_mut(), self.input.as_mut()) else {
            return Ok(());
        };
        input
            .set(&self.config.fraction_field, SignalValue::Double(target.value()))
            .map_err(|e| LinkError::FatalConfig(format!("override fields: {}", e)))?;

        if let Err(e) = session.send(input) {
            return self.link_failure(e);
        }
        self.applied = Some(target);

        if self.ctx.attachment.is_attached() {
            info!("Distance {} -> speed {}", self.held, target);
        } else {
            info!("No producer attached -> speed {}", target);
        }
        Ok(())
    }

    /// 本节拍的目标比例
    fn target_fraction(&mut self) -> SpeedFraction {
        let attachment = &self.ctx.attachment;

        // 新连接（包括节拍之间的断开重连）不沿用旧读数
        let epoch = attachment.epoch();
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.held = DistanceSample::UNKNOWN;
        }

        if !attachment.is_attached() {
            self.held = DistanceSample::UNKNOWN;
            return self.config.detached_fraction;
        }

        if let Some(sample) = self.ctx.distance.try_take_latest() {
            self.held = sample;
        }
        self.policy.map(self.held)
    }

    // ------------------------------------------------------------------
    // 故障与关停
    // ------------------------------------------------------------------

    /// 瞬时链路故障：关闭会话，退避后从 `Disconnected` 重来
    fn link_failure(&mut self, cause: SessionError) -> Result<(), LinkError> {
        self.close_session();
        self.consecutive_failures += 1;

        let budget = self.config.reconnect.failure_budget;
        if self.consecutive_failures > budget {
            return Err(LinkError::LinkBudgetExhausted {
                failures: self.consecutive_failures,
                budget,
                last: cause,
            });
        }

        let backoff = self.config.reconnect.backoff_for(self.consecutive_failures);
        warn!(
            "{}; reconnecting in {:?} (failure {}/{})",
            LinkError::TransientLink(cause),
            backoff,
            self.consecutive_failures,
            budget
        );
        self.reconnects += 1;
        self.set_state(LinkState::Disconnected);
        self.publish_status();

        // 可取消的退避
        self.ctx.shutdown.wait_timeout(backoff);
        Ok(())
    }

    /// 取消：释放覆盖（pause）并关闭会话
    fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if matches!(self.state, LinkState::Streaming | LinkState::Synchronizing) {
                info!("Pausing robot data exchange before disconnect");
                if let Err(e) = session.pause() {
                    warn!("Failed to pause robot session: {}", e);
                }
            }
        }
        self.close_session();
        self.set_state(LinkState::Stopped);
        self.publish_status();
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!("Robot session closed");
        }
        self.input = None;
        self.applied = None;
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!("Robot link: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// 有变化时发布新快照
    fn publish_status(&self) {
        let status = GovernorStatus {
            state: self.state,
            applied_fraction: self.applied,
            last_distance: self.held,
            producer_attached: self.ctx.attachment.is_attached(),
            reconnects: self.reconnects,
        };
        if **self.status.load() != status {
            self.status.store(Arc::new(status));
        }
    }
}

fn log_output_diagnostics(output: &SignalState) {
    if !tracing::enabled!(Level::TRACE) {
        return;
    }
    for name in DIAGNOSTIC_OUTPUTS {
        if let Some(value) = output.get(name) {
            trace!("Robot state {}: {}", name, value);
        }
    }
}
