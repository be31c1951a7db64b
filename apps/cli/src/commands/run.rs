//! run 命令
//!
//! 启动接入线程、链路线程和操作员控制台，主线程监督状态直到关停。

use anyhow::{Context, Result, bail};
use clap::Args;
use speedgov_client::{
    GovernorExit, GovernorHandle, GovernorStatus, LinkController, SimulatedConnector,
    SimulatedRobot,
};
use speedgov_driver::{GovernorContext, IngressListener, ShutdownSignal};
use speedgov_tools::TransportKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::console;
use crate::settings::{self, Overrides};

/// 状态检查周期
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(250);

/// 运行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: PathBuf,

    /// 接入监听地址（覆盖配置）
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// 接入传输方式：tcp / udp / pipe（覆盖配置）
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// 机器人控制器地址（覆盖配置）
    #[arg(long)]
    pub robot_host: Option<String>,

    /// 驱动内存模拟的运动控制器（未链接原生后端时必须显式指定）
    #[arg(long)]
    pub simulate: bool,
}

impl RunCommand {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen: self.listen,
            transport: self.transport,
            robot_host: self.robot_host.clone(),
        }
    }

    /// 运行调速器直到关停
    pub fn execute(&self, shutdown: ShutdownSignal) -> Result<ExitCode> {
        let config = settings::load_config(&self.config, &self.overrides())?;
        info!(
            "Loaded {} (recipe {})",
            self.config.display(),
            config.recipe_path.display()
        );
        for line in config.policy.describe() {
            info!("  {}", line);
        }

        let ingress = settings::ingress_config(&config.governor);
        let link = settings::link_config(&config)?;

        // 没有原生后端时不能静默地驱动模拟器
        if !self.simulate {
            bail!(
                "No native motion-controller backend is linked; cannot drive {}:{}. \
                 Pass --simulate to run against the simulated controller",
                link.host,
                link.port
            );
        }

        // 绑定失败是启动期致命错误
        let listener = IngressListener::bind(&ingress)
            .with_context(|| format!("Failed to start distance ingress on {}", ingress.transport))?;

        let ctx = GovernorContext::with_shutdown(shutdown.clone());

        warn!(
            "Simulation mode: driving the simulated controller in place of {}:{}",
            link.host, link.port
        );
        let connector = SimulatedConnector::new(SimulatedRobot::new());
        let controller = LinkController::new(connector, link, config.policy.clone(), ctx.clone());

        let governor = GovernorHandle::spawn(listener, controller, ctx)
            .context("Failed to start governor threads")?;
        console::spawn(shutdown.clone())?;
        info!("Governor running. Type 'quit' or press Ctrl+C to stop.");

        let exit = supervise(governor, &shutdown);
        Ok(report(&exit))
    }
}

/// 在状态变化时记录快照，直到请求关停
fn supervise(governor: GovernorHandle, shutdown: &ShutdownSignal) -> GovernorExit {
    let mut last: Option<GovernorStatus> = None;
    loop {
        let stopping = shutdown.wait_timeout(SUPERVISE_INTERVAL);

        let status = governor.status();
        let changed = last.as_ref().is_none_or(|prev| {
            prev.state != status.state || prev.producer_attached != status.producer_attached
        });
        if changed {
            info!("Status: {}", status);
            last = Some(status);
        }

        if stopping {
            break;
        }
    }
    if let Some(reason) = shutdown.reason() {
        info!("Shutting down ({})", reason);
    }
    governor.join()
}

fn report(exit: &GovernorExit) -> ExitCode {
    info!("Final status: {}", exit.status);
    info!("Ingress: {}", exit.ingress);

    if exit.is_fatal() {
        error!("Governor stopped: {}", exit.reason);
        eprintln!("Governor stopped: {}", exit.reason);
        ExitCode::FAILURE
    } else {
        info!("Governor stopped: {}", exit.reason);
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: RunCommand,
    }

    #[test]
    fn test_run_command_overrides() {
        let cli = TestCli::parse_from([
            "speedgov",
            "--config",
            "governor.toml",
            "--transport",
            "udp",
            "--listen",
            "127.0.0.1:14000",
            "--robot-host",
            "10.4.1.87",
        ]);
        let overrides = cli.args.overrides();
        assert_eq!(overrides.transport, Some(TransportKind::Udp));
        assert_eq!(overrides.listen, "127.0.0.1:14000".parse().ok());
        assert_eq!(overrides.robot_host.as_deref(), Some("10.4.1.87"));
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = TestCli::parse_from(["speedgov", "-c", "governor.toml"]);
        assert_eq!(cli.args.config, PathBuf::from("governor.toml"));
        assert!(cli.args.transport.is_none());
        assert!(!cli.args.simulate);
    }

    #[test]
    fn test_simulate_flag() {
        let cli = TestCli::parse_from(["speedgov", "-c", "governor.toml", "--simulate"]);
        assert!(cli.args.simulate);
    }

    #[test]
    fn test_invalid_transport_rejected() {
        assert!(
            TestCli::try_parse_from(["speedgov", "-c", "g.toml", "--transport", "serial"]).is_err()
        );
    }
}
