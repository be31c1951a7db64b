//! 操作员控制台
//!
//! 专用输入线程读取标准输入：`quit` 请求关停，其他输入回显提示后忽略。
//! stdin 关闭（例如以服务方式运行）时线程直接结束，不影响调速器。

use anyhow::{Context, Result};
use speedgov_driver::{ShutdownReason, ShutdownSignal};
use std::io::{self, BufRead};
use std::thread;
use tracing::{debug, info};

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        ConsoleCommand::Empty
    } else if line.eq_ignore_ascii_case("quit") {
        ConsoleCommand::Quit
    } else {
        ConsoleCommand::Unknown(line.to_string())
    }
}

/// 启动控制台线程（不 join：阻塞在 stdin 上的线程随进程退出）
pub fn spawn(shutdown: ShutdownSignal) -> Result<()> {
    thread::Builder::new()
        .name("operator_console".into())
        .spawn(move || run(io::stdin().lock(), &shutdown))
        .context("Failed to spawn operator console thread")?;
    Ok(())
}

fn run(input: impl BufRead, shutdown: &ShutdownSignal) {
    for line in input.lines() {
        if shutdown.is_requested() {
            return;
        }
        let Ok(line) = line else {
            break;
        };
        match parse_command(&line) {
            ConsoleCommand::Quit => {
                info!("Operator requested shutdown");
                shutdown.request(ShutdownReason::Operator);
                return;
            },
            ConsoleCommand::Empty => {},
            ConsoleCommand::Unknown(text) => {
                println!("Unknown command '{}'. Type 'quit' to stop the governor.", text);
            },
        }
    }
    debug!("Operator console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("quit\n"), ConsoleCommand::Quit);
        assert_eq!(parse_command("  QUIT "), ConsoleCommand::Quit);
        assert_eq!(parse_command(""), ConsoleCommand::Empty);
        assert_eq!(
            parse_command("stop"),
            ConsoleCommand::Unknown("stop".into())
        );
    }

    #[test]
    fn test_quit_requests_operator_shutdown() {
        let shutdown = ShutdownSignal::new();
        run(&b"hello\n\nquit\nignored\n"[..], &shutdown);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Operator));
    }

    #[test]
    fn test_eof_does_not_shut_down() {
        let shutdown = ShutdownSignal::new();
        run(&b"status\n"[..], &shutdown);
        assert!(!shutdown.is_requested());
    }
}
