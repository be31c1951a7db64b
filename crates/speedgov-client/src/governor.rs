//! 线程编排
//!
//! 两个长期线程：
//! - `distance_ingress`: 阻塞于接入监听器，写邮箱
//! - `robot_link`: 链路状态机 + 固定频率控制节拍，读邮箱
//!
//! 任一线程出错（或 panic）都会以 `Fatal` 请求关停，另一个线程在下一次有界等待后退出。

use crate::controller::{GovernorStatus, LinkController};
use crate::session::SessionConnector;
use arc_swap::ArcSwap;
use speedgov_driver::{
    DriverError, GovernorContext, IngressListener, IngressMetricsSnapshot, ShutdownReason,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info};

const INGRESS_THREAD: &str = "distance_ingress";
const LINK_THREAD: &str = "robot_link";

#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("Failed to spawn thread '{name}': {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// 调速器退出结果
#[derive(Debug, Clone)]
pub struct GovernorExit {
    pub reason: ShutdownReason,
    /// 最后一次状态快照
    pub status: GovernorStatus,
    pub ingress: IngressMetricsSnapshot,
}

impl GovernorExit {
    pub fn is_fatal(&self) -> bool {
        self.reason.is_fatal()
    }
}

/// 线程 panic 时请求致命关停
struct PanicGuard {
    ctx: Arc<GovernorContext>,
    name: &'static str,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Thread '{}' panicked", self.name);
            self.ctx
                .shutdown
                .request(ShutdownReason::Fatal(format!("{} thread panicked", self.name)));
        }
    }
}

/// 运行中的调速器
pub struct GovernorHandle {
    ctx: Arc<GovernorContext>,
    status: Arc<ArcSwap<GovernorStatus>>,
    ingress_thread: Option<JoinHandle<()>>,
    link_thread: Option<JoinHandle<()>>,
}

impl GovernorHandle {
    /// 启动接入线程和链路线程
    ///
    /// `listener` 必须已绑定（绑定失败属于启动期错误，由调用方处理）。
    pub fn spawn<C>(
        listener: IngressListener,
        controller: LinkController<C>,
        ctx: Arc<GovernorContext>,
    ) -> Result<Self, GovernorError>
    where
        C: SessionConnector + 'static,
        C::Session: 'static,
    {
        let status = controller.status_handle();

        let ingress_ctx = Arc::clone(&ctx);
        let ingress_thread = thread::Builder::new()
            .name(INGRESS_THREAD.into())
            .spawn(move || {
                let _guard = PanicGuard {
                    ctx: Arc::clone(&ingress_ctx),
                    name: INGRESS_THREAD,
                };
                if let Err(e) = listener.run(&ingress_ctx) {
                    error!("Distance ingress failed: {}", e);
                    ingress_ctx.shutdown.request(ShutdownReason::Fatal(e.to_string()));
                }
            })
            .map_err(|source| GovernorError::Thread {
                name: INGRESS_THREAD,
                source,
            })?;

        let link_ctx = Arc::clone(&ctx);
        let link_thread = thread::Builder::new()
            .name(LINK_THREAD.into())
            .spawn(move || {
                let _guard = PanicGuard {
                    ctx: Arc::clone(&link_ctx),
                    name: LINK_THREAD,
                };
                if let Err(e) = controller.run() {
                    link_ctx.shutdown.request(ShutdownReason::Fatal(e.to_string()));
                }
            });

        let link_thread = match link_thread {
            Ok(handle) => handle,
            Err(source) => {
                // 接入线程已经在运行，先让它退出
                ctx.shutdown
                    .request(ShutdownReason::Fatal(format!("failed to spawn {}", LINK_THREAD)));
                let _ = ingress_thread.join();
                return Err(GovernorError::Thread {
                    name: LINK_THREAD,
                    source,
                });
            },
        };

        info!("Governor started");
        Ok(Self {
            ctx,
            status,
            ingress_thread: Some(ingress_thread),
            link_thread: Some(link_thread),
        })
    }

    /// 当前状态快照
    pub fn status(&self) -> GovernorStatus {
        GovernorStatus::clone(&self.status.load())
    }

    pub fn context(&self) -> &Arc<GovernorContext> {
        &self.ctx
    }

    /// 请求关停（第一个原因生效）
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.ctx.shutdown.request(reason);
    }

    /// 等待两个线程退出
    pub fn join(mut self) -> GovernorExit {
        self.join_threads();

        let reason = self.ctx.shutdown.reason().unwrap_or_else(|| {
            ShutdownReason::Fatal("governor threads exited without a shutdown request".into())
        });
        GovernorExit {
            reason,
            status: self.status(),
            ingress: self.ctx.metrics.snapshot(),
        }
    }

    fn join_threads(&mut self) {
        for (name, handle) in [
            (LINK_THREAD, self.link_thread.take()),
            (INGRESS_THREAD, self.ingress_thread.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("Thread '{}' terminated by panic", name);
                } else {
                    debug!("Thread '{}' joined", name);
                }
            }
        }
    }
}

impl Drop for GovernorHandle {
    fn drop(&mut self) {
        if self.link_thread.is_some() || self.ingress_thread.is_some() {
            self.ctx.shutdown.request(ShutdownReason::Operator);
            self.join_threads();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{LinkConfig, LinkState, ReconnectPolicy};
    use crate::sim::SimulatedRobot;
    use speedgov_driver::{IngressConfig, IngressTransport};
    use speedgov_tools::{Recipe, SignalSpec, SignalType, SpeedFraction, SpeedPolicy};
    use std::time::{Duration, Instant};

    fn link_config() -> LinkConfig {
        LinkConfig {
            host: "sim".into(),
            port: 30004,
            frequency_hz: 250.0,
            recipe: Recipe {
                inputs: vec![
                    SignalSpec {
                        name: "speed_slider_mask".into(),
                        kind: SignalType::Uint32,
                    },
                    SignalSpec {
                        name: "speed_slider_fraction".into(),
                        kind: SignalType::Double,
                    },
                ],
                outputs: vec![],
            },
            enable_field: "speed_slider_mask".into(),
            fraction_field: "speed_slider_fraction".into(),
            detached_fraction: SpeedFraction::FULL,
            connect_attempts: 2,
            connect_interval: Duration::from_millis(5),
            sync_timeout: Duration::from_millis(200),
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn udp_listener() -> IngressListener {
        IngressListener::bind(&IngressConfig {
            transport: IngressTransport::Udp {
                listen: "127.0.0.1:0".parse().unwrap(),
            },
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_operator_shutdown() {
        let robot = SimulatedRobot::new();
        let ctx = GovernorContext::new();
        let controller = LinkController::new(
            robot.connector(),
            link_config(),
            SpeedPolicy::default(),
            Arc::clone(&ctx),
        );
        let governor = GovernorHandle::spawn(udp_listener(), controller, ctx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while governor.status().state != LinkState::Streaming && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(governor.status().state, LinkState::Streaming);

        governor.shutdown(ShutdownReason::Operator);
        let exit = governor.join();
        assert_eq!(exit.reason, ShutdownReason::Operator);
        assert!(!exit.is_fatal());
        assert_eq!(exit.status.state, LinkState::Stopped);
        assert_eq!(robot.pauses(), 1);
    }

    #[test]
    fn test_link_failure_stops_ingress() {
        let robot = SimulatedRobot::new();
        robot.set_link_down(true);
        let ctx = GovernorContext::new();
        let controller = LinkController::new(
            robot.connector(),
            link_config(),
            SpeedPolicy::default(),
            Arc::clone(&ctx),
        );
        let governor = GovernorHandle::spawn(udp_listener(), controller, ctx).unwrap();

        let exit = governor.join();
        assert!(exit.is_fatal());
        assert!(exit.reason.to_string().contains("after 2 attempts"));
    }
}
