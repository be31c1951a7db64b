//! TCP 接入：同一时刻一个生产者，显式分帧

use super::IngressConfig;
use super::socket::bind_socket;
use crate::context::GovernorContext;
use crate::error::DriverError;
use crate::metrics::IngressMetrics;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Protocol, Type};
use speedgov_protocol::StreamFramer;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, trace, warn};

const LISTENER: Token = Token(0);
const PEER: Token = Token(1);

/// 单次 read 的缓冲区大小
const READ_CHUNK: usize = 1024;

/// 当前连接的生产者
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    framer: StreamFramer,
}

enum PeerStatus {
    /// 数据已读完，连接仍然打开
    Open,
    /// 对端关闭（read 返回 0）
    Closed,
    Failed(io::Error),
}

/// TCP 接入监听器
#[derive(Debug)]
pub struct TcpIngress {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl TcpIngress {
    pub(super) fn bind(addr: SocketAddr, config: &IngressConfig) -> Result<Self, DriverError> {
        let socket = bind_socket(addr, Type::STREAM, Protocol::TCP, config.recv_buffer)?;
        // backlog = 1：只服务一个生产者
        socket
            .listen(1)
            .map_err(|source| DriverError::Bind { addr, source })?;

        let std_listener: std::net::TcpListener = socket.into();
        let local_addr = std_listener.local_addr()?;
        let mut listener = TcpListener::from_std(std_listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            local_addr,
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(super) fn run(mut self, ctx: &GovernorContext) -> Result<(), DriverError> {
        let mut events = Events::with_capacity(16);
        let mut peer: Option<Peer> = None;

        while !ctx.shutdown.is_requested() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_interval)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(DriverError::Socket(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_pending(&mut peer, ctx),
                    PEER => self.service_peer(&mut peer, ctx),
                    _ => {},
                }
            }
        }

        if let Some(current) = peer.take() {
            self.close_peer(current, ctx);
        }
        Ok(())
    }

    /// 接受所有排队的连接（mio 边沿触发，必须读到 WouldBlock）
    fn accept_pending(&mut self, peer: &mut Option<Peer>, ctx: &GovernorContext) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Some(current) = peer.as_ref() {
                        warn!(
                            "Rejecting producer {}: {} is already attached",
                            addr, current.addr
                        );
                        IngressMetrics::incr(&ctx.metrics.connections_rejected);
                        drop(stream);
                        continue;
                    }
                    self.attach_peer(stream, addr, peer, ctx);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    IngressMetrics::incr(&ctx.metrics.io_errors);
                    break;
                },
            }
        }
    }

    fn attach_peer(
        &mut self,
        mut stream: TcpStream,
        addr: SocketAddr,
        peer: &mut Option<Peer>,
        ctx: &GovernorContext,
    ) {
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, PEER, Interest::READABLE)
        {
            warn!("Failed to register producer {}: {}", addr, e);
            IngressMetrics::incr(&ctx.metrics.io_errors);
            return;
        }

        ctx.attachment.attach();
        IngressMetrics::incr(&ctx.metrics.connections_accepted);
        info!("Producer connected from {}", addr);

        *peer = Some(Peer {
            stream,
            addr,
            framer: StreamFramer::new(),
        });

        // 连接建立前已到达的数据
        self.service_peer(peer, ctx);
    }

    fn service_peer(&mut self, peer: &mut Option<Peer>, ctx: &GovernorContext) {
        let Some(current) = peer.as_mut() else {
            return;
        };

        match read_available(current, ctx) {
            PeerStatus::Open => {},
            PeerStatus::Closed => {
                info!("Producer {} disconnected", current.addr);
                if let Some(closed) = peer.take() {
                    self.close_peer(closed, ctx);
                }
            },
            PeerStatus::Failed(e) => {
                warn!("Producer {} socket error: {}", current.addr, e);
                IngressMetrics::incr(&ctx.metrics.io_errors);
                if let Some(failed) = peer.take() {
                    self.close_peer(failed, ctx);
                }
                ctx.shutdown.wait_timeout(self.error_backoff);
            },
        }
    }

    fn close_peer(&mut self, mut peer: Peer, ctx: &GovernorContext) {
        let _ = self.poll.registry().deregister(&mut peer.stream);

        let trailing = peer.framer.clear();
        if trailing > 0 {
            warn!(
                "Discarding {} trailing bytes from {} (incomplete message)",
                trailing, peer.addr
            );
            IngressMetrics::incr(&ctx.metrics.malformed_messages);
        }

        ctx.producer_detached();
    }
}

/// 读取直到 WouldBlock，逐帧发布
fn read_available(peer: &mut Peer, ctx: &GovernorContext) -> PeerStatus {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match peer.stream.read(&mut buf) {
            Ok(0) => return PeerStatus::Closed,
            Ok(n) => {
                peer.framer.push(&buf[..n]);
                while let Some(result) = peer.framer.next_sample() {
                    match result {
                        Ok(sample) => {
                            trace!("Received distance {} from {}", sample, peer.addr);
                            ctx.publish(sample);
                        },
                        Err(e) => {
                            warn!("Dropping message from {}: {}", peer.addr, e);
                            IngressMetrics::incr(&ctx.metrics.malformed_messages);
                        },
                    }
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return PeerStatus::Open,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return PeerStatus::Failed(e),
        }
    }
}
