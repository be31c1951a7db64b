//! 进程隔离的生产者：子进程 stdout 行协议
//!
//! 子进程每行输出 `DISTANCE:<float>`（必须逐行 flush）。
//! 不带前缀的行忽略，stderr 转发到日志。
//!
//! stdout 打开期间视为已连接。子进程意外退出时断开并按退避重启，
//! 超过重启预算返回致命错误。
//!
//! 关停：向子进程组发送 SIGTERM，等待 2 秒，仍未退出则 SIGKILL。

use super::IngressConfig;
use crate::context::GovernorContext;
use crate::error::DriverError;
use crate::metrics::IngressMetrics;
use crossbeam_channel::{RecvTimeoutError, Sender};
use speedgov_protocol::parse_line;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// SIGTERM 后等待子进程退出的时间
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// 等待子进程退出时的轮询间隔
const REAP_POLL: Duration = Duration::from_millis(50);

enum PipeEvent {
    Stdout(String),
    /// 非 UTF-8 的 stdout 行
    InvalidStdout(Vec<u8>),
    Stderr(String),
    StdoutClosed,
}

enum PipeOutcome {
    /// 请求关停
    Stopped,
    /// 子进程 stdout 关闭或进程退出
    Exited(Option<ExitStatus>),
}

/// 子进程管道接入
#[derive(Debug)]
pub struct PipeIngress {
    command: Vec<String>,
    poll_interval: Duration,
    error_backoff: Duration,
    restart_budget: u32,
}

impl PipeIngress {
    pub(super) fn new(command: Vec<String>, config: &IngressConfig) -> Result<Self, DriverError> {
        if command.first().is_none_or(|program| program.is_empty()) {
            return Err(DriverError::InvalidConfig(
                "producer command must not be empty".to_string(),
            ));
        }
        Ok(Self {
            command,
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
            restart_budget: config.restart_budget,
        })
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub(super) fn run(self, ctx: &GovernorContext) -> Result<(), DriverError> {
        let mut restarts = 0u32;
        let mut started_once = false;

        while !ctx.shutdown.is_requested() {
            let mut child = match self.spawn() {
                Ok(child) => child,
                // 第一次启动失败是配置问题，直接致命
                Err(e) if !started_once => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    self.count_restart(&mut restarts)?;
                    ctx.shutdown.wait_timeout(self.error_backoff);
                    continue;
                },
            };
            started_once = true;

            let outcome = self.supervise(&mut child, ctx);
            ctx.producer_detached();
            terminate(&mut child);

            match outcome? {
                PipeOutcome::Stopped => break,
                PipeOutcome::Exited(status) => {
                    match status {
                        Some(status) => error!("Producer process exited unexpectedly: {}", status),
                        None => error!("Producer process closed its output"),
                    }
                    self.count_restart(&mut restarts)?;
                    ctx.shutdown.wait_timeout(self.error_backoff);
                },
            }
        }
        Ok(())
    }

    fn count_restart(&self, restarts: &mut u32) -> Result<(), DriverError> {
        *restarts += 1;
        if *restarts > self.restart_budget {
            return Err(DriverError::RestartBudgetExhausted(self.restart_budget));
        }
        info!(
            "Restarting producer process (attempt {}/{})",
            restarts, self.restart_budget
        );
        Ok(())
    }

    fn spawn(&self) -> Result<Child, DriverError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| DriverError::InvalidConfig("empty producer command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // 独立进程组：关停时连同孙进程一起终止
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|source| DriverError::Spawn {
            command: self.command_line(),
            source,
        })
    }

    fn supervise(&self, child: &mut Child, ctx: &GovernorContext) -> Result<PipeOutcome, DriverError> {
        let (tx, rx) = crossbeam_channel::unbounded();

        if let Some(stdout) = child.stdout.take() {
            spawn_reader("producer_stdout", stdout, tx.clone(), stdout_event, true)?;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader("producer_stderr", stderr, tx.clone(), stderr_event, false)?;
        }
        drop(tx);

        ctx.attachment.attach();
        IngressMetrics::incr(&ctx.metrics.connections_accepted);
        info!("Producer process started (pid {})", child.id());

        loop {
            if ctx.shutdown.is_requested() {
                return Ok(PipeOutcome::Stopped);
            }

            match rx.recv_timeout(self.poll_interval) {
                Ok(PipeEvent::Stdout(line)) => handle_line(&line, ctx),
                Ok(PipeEvent::InvalidStdout(raw)) => {
                    warn!(
                        "Dropping producer line: not valid UTF-8 ({})",
                        String::from_utf8_lossy(&raw).trim_end()
                    );
                    IngressMetrics::incr(&ctx.metrics.malformed_messages);
                },
                Ok(PipeEvent::Stderr(line)) => debug!("[producer] {}", line.trim_end()),
                Ok(PipeEvent::StdoutClosed) | Err(RecvTimeoutError::Disconnected) => {
                    // 残余 stderr 往往包含退出原因
                    for event in rx.try_iter() {
                        if let PipeEvent::Stderr(line) = event {
                            warn!("[producer] {}", line.trim_end());
                        }
                    }
                    return Ok(PipeOutcome::Exited(child.try_wait().ok().flatten()));
                },
                Err(RecvTimeoutError::Timeout) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Ok(PipeOutcome::Exited(Some(status)));
                    }
                },
            }
        }
    }
}

fn handle_line(line: &str, ctx: &GovernorContext) {
    match parse_line(line) {
        Ok(Some(sample)) => {
            trace!("Received distance {} from producer", sample);
            ctx.publish(sample);
        },
        Ok(None) => debug!("Ignoring producer output: {}", line.trim()),
        Err(e) => {
            warn!("Dropping producer line: {}", e);
            IngressMetrics::incr(&ctx.metrics.malformed_messages);
        },
    }
}

fn stdout_event(raw: Vec<u8>) -> PipeEvent {
    match String::from_utf8(raw) {
        Ok(line) => PipeEvent::Stdout(line),
        Err(e) => PipeEvent::InvalidStdout(e.into_bytes()),
    }
}

fn stderr_event(raw: Vec<u8>) -> PipeEvent {
    PipeEvent::Stderr(String::from_utf8_lossy(&raw).into_owned())
}

/// 逐行读取管道（原始字节），转发到通道；管道关闭或接收端丢弃时退出
///
/// 单行内容不合法不会中断读取。
fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    source: R,
    tx: Sender<PipeEvent>,
    decode: fn(Vec<u8>) -> PipeEvent,
    report_close: bool,
) -> Result<(), DriverError> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut reader = BufReader::new(source);
            loop {
                let mut raw = Vec::new();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {
                        if raw.last() == Some(&b'\n') {
                            raw.pop();
                            if raw.last() == Some(&b'\r') {
                                raw.pop();
                            }
                        }
                        if tx.send(decode(raw)).is_err() {
                            return;
                        }
                    },
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            if report_close {
                let _ = tx.send(PipeEvent::StdoutClosed);
            }
        })
        .map(|_| ())
        .map_err(|source| DriverError::Thread {
            name: name.to_string(),
            source,
        })
}

/// SIGTERM → 等待 → SIGKILL，并回收子进程
fn terminate(child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        trace!("Producer already exited: {}", status);
        // 组内可能仍有孙进程
        signal_group(child, Signal::Terminate);
        return;
    }

    info!("Sending terminate request to producer (pid {})", child.id());
    signal_group(child, Signal::Terminate);

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Producer exited: {}", status);
                return;
            },
            Ok(None) => thread::sleep(REAP_POLL),
            Err(e) => {
                warn!("Failed to poll producer status: {}", e);
                break;
            },
        }
    }

    warn!("Producer did not exit gracefully, killing it");
    signal_group(child, Signal::Kill);
    let _ = child.kill();
    let _ = child.wait();
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) 只接受整数参数；子进程以自身 pid 作为进程组 id 启动
    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc != 0 {
        trace!(
            "kill(-{}, {}) failed: {}",
            pgid,
            sig,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    let _ = child.kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ingress::IngressTransport;
    use crate::shutdown::ShutdownReason;
    use std::sync::Arc;

    fn config(script: &str, restart_budget: u32) -> (Vec<String>, IngressConfig) {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let config = IngressConfig {
            transport: IngressTransport::Pipe {
                command: command.clone(),
            },
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(10),
            restart_budget,
            ..Default::default()
        };
        (command, config)
    }

    #[test]
    fn test_handle_line_publishes_and_ignores() {
        let ctx = GovernorContext::new();
        handle_line("DISTANCE:0.30", &ctx);
        handle_line("Received 5 packets in the last second.", &ctx);
        handle_line("DISTANCE:oops", &ctx);

        assert_eq!(ctx.distance.try_take_latest().map(|s| s.meters()), Some(0.30));
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.samples_published, 1);
        assert_eq!(snap.malformed_messages, 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_dropped() {
        let (command, config) = config(
            "printf '\\377\\n'; echo DISTANCE:1.00; echo DISTANCE:2.00; exec sleep 30",
            0,
        );
        let pipe = PipeIngress::new(command, &config).unwrap();
        let ctx = GovernorContext::new();

        let worker = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || pipe.run(&ctx))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.metrics.snapshot().samples_published < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let snap = ctx.metrics.snapshot();
        assert_eq!(snap.samples_published, 2);
        assert_eq!(snap.malformed_messages, 1);
        // 子进程仍在运行，未触发重启
        assert!(ctx.attachment.is_attached());
        assert_eq!(snap.connections_accepted, 1);

        ctx.shutdown.request(ShutdownReason::Operator);
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_restart_budget_exhausted() {
        let (command, config) = config("echo DISTANCE:1.50; exit 3", 2);
        let pipe = PipeIngress::new(command, &config).unwrap();
        let ctx = GovernorContext::new();

        let err = pipe.run(&ctx).unwrap_err();
        assert!(matches!(err, DriverError::RestartBudgetExhausted(2)));
        assert_eq!(ctx.metrics.snapshot().connections_accepted, 3);
        assert!(!ctx.attachment.is_attached());
    }

    #[test]
    fn test_shutdown_terminates_long_running_producer() {
        let (command, config) = config("echo DISTANCE:2.60; exec sleep 30", 0);
        let pipe = PipeIngress::new(command, &config).unwrap();
        let ctx = GovernorContext::new();

        let worker = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || pipe.run(&ctx))
        };

        // 等待样本到达
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.metrics.snapshot().samples_published == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(ctx.attachment.is_attached());
        assert_eq!(ctx.distance.try_take_latest().map(|s| s.meters()), Some(2.60));

        let start = Instant::now();
        ctx.shutdown.request(ShutdownReason::Operator);
        worker.join().unwrap().unwrap();
        assert!(start.elapsed() < TERMINATE_GRACE + Duration::from_secs(1));
        assert!(!ctx.attachment.is_attached());
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let command = vec!["/nonexistent/speedgov-producer".to_string()];
        let config = IngressConfig {
            transport: IngressTransport::Pipe {
                command: command.clone(),
            },
            ..Default::default()
        };
        let pipe = PipeIngress::new(command, &config).unwrap();
        let ctx = GovernorContext::new();
        assert!(matches!(pipe.run(&ctx), Err(DriverError::Spawn { .. })));
    }
}
