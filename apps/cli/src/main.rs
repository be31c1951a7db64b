//! # Speed Governor CLI
//!
//! 接近速度调速器：监听距离读数，按距离区间调整机器人速度覆盖比例。
//!
//! ```bash
//! # 校验配置和 recipe，打印速度区间表
//! speedgov check --config config/governor.toml
//!
//! # 运行（控制台输入 quit 或 Ctrl+C 退出）
//! speedgov run --config config/governor.toml --transport udp --listen 0.0.0.0:13750 --simulate
//! ```
//!
//! 退出码：正常退出 0；致命错误（配置、协商、重试预算耗尽）1。

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;
mod console;
mod settings;

use commands::{CheckCommand, RunCommand};
use speedgov_driver::{ShutdownReason, ShutdownSignal};

/// 默认日志过滤
const DEFAULT_LOG_DIRECTIVE: &str = "speedgov=info";

/// Speed Governor - 接近速度调速器
#[derive(Parser, Debug)]
#[command(name = "speedgov")]
#[command(about = "Proximity speed governor for a collaborative robot", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别（覆盖 RUST_LOG），例如 debug 或 speedgov=trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行调速器
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 校验配置文件和 recipe
    Check {
        #[command(flatten)]
        args: CheckCommand,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => {
            // 单独的级别名作用于本项目所有 crate
            let directive = if level.contains('=') || level.contains(',') {
                level.to_string()
            } else {
                format!("speedgov={level}")
            };
            tracing_subscriber::EnvFilter::try_new(directive)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
        },
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_DIRECTIVE)),
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Check { args } => args.execute(),
        Commands::Run { args } => {
            let shutdown = ShutdownSignal::new();

            // Ctrl+C：请求关停，由各线程在有界等待后退出
            let handler_signal = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                eprintln!("\nReceived interrupt signal. Shutting down...");
                handler_signal.request(ShutdownReason::Interrupt);
            }) {
                eprintln!("Failed to set signal handler: {}", e);
                return ExitCode::FAILURE;
            }

            args.execute(shutdown)
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}
