//! UDP 接入：任意发送方，一个数据报一条报文
//!
//! 无连接传输没有"连接"概念：监听期间始终视为生产者已连接。

use super::IngressConfig;
use super::socket::bind_socket;
use crate::context::GovernorContext;
use crate::error::DriverError;
use crate::metrics::IngressMetrics;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Protocol, Type};
use speedgov_protocol::decode_datagram;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const SOCKET: Token = Token(0);

/// 接收缓冲区：超长数据报被截断后必然不是 4 字节，按长度错误丢弃
const MAX_DATAGRAM: usize = 1024;

/// 接收速率统计窗口
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// UDP 接入监听器
#[derive(Debug)]
pub struct UdpIngress {
    poll: Poll,
    socket: UdpSocket,
    local_addr: SocketAddr,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl UdpIngress {
    pub(super) fn bind(addr: SocketAddr, config: &IngressConfig) -> Result<Self, DriverError> {
        let socket = bind_socket(addr, Type::DGRAM, Protocol::UDP, config.recv_buffer)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let local_addr = std_socket.local_addr()?;
        let mut socket = UdpSocket::from_std(std_socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)?;

        Ok(Self {
            poll,
            socket,
            local_addr,
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(super) fn run(mut self, ctx: &GovernorContext) -> Result<(), DriverError> {
        let mut events = Events::with_capacity(4);
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut rate = RateCounter::new();

        ctx.attachment.attach();

        while !ctx.shutdown.is_requested() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_interval)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(DriverError::Socket(e));
            }

            if !events.is_empty() {
                self.drain_datagrams(&mut buf, &mut rate, ctx);
            }

            if let Some(count) = rate.roll() {
                debug!("Received {} packets in the last second", count);
            }
        }
        Ok(())
    }

    fn drain_datagrams(&mut self, buf: &mut [u8], rate: &mut RateCounter, ctx: &GovernorContext) {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, from)) => {
                    rate.hit();
                    match decode_datagram(&buf[..len]) {
                        Ok(sample) => {
                            trace!("Received distance {} from {}", sample, from);
                            ctx.publish(sample);
                        },
                        Err(e) => {
                            warn!("Dropping datagram from {}: {}", from, e);
                            IngressMetrics::incr(&ctx.metrics.malformed_messages);
                        },
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    IngressMetrics::incr(&ctx.metrics.io_errors);
                    // 边沿触发：错误后继续读到 WouldBlock，否则剩余数据报不会再触发事件
                    if ctx.shutdown.wait_timeout(self.error_backoff) {
                        break;
                    }
                },
            }
        }
    }
}

/// 每秒接收数据报计数
struct RateCounter {
    count: u64,
    window_start: Instant,
}

impl RateCounter {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn hit(&mut self) {
        self.count += 1;
    }

    /// 窗口结束时返回本窗口计数（无数据的窗口不报告）
    fn roll(&mut self) -> Option<u64> {
        if self.window_start.elapsed() < RATE_WINDOW {
            return None;
        }
        let count = std::mem::take(&mut self.count);
        self.window_start = Instant::now();
        (count > 0).then_some(count)
    }
}
