//! socket2 建立监听 socket，再交给 mio 做有界等待

use crate::error::DriverError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// 创建 SO_REUSEADDR + 指定接收缓冲区的非阻塞 socket 并绑定
pub(super) fn bind_socket(
    addr: SocketAddr,
    ty: Type,
    protocol: Protocol,
    recv_buffer: usize,
) -> Result<Socket, DriverError> {
    let bind_err = |source: std::io::Error| DriverError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;

    // 缓冲区大小只是建议值，内核可能调整；失败不致命
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        warn!("Failed to set SO_RCVBUF to {}: {}", recv_buffer, e);
    } else if let Ok(actual) = socket.recv_buffer_size() {
        debug!("SO_RCVBUF requested {} bytes, kernel reports {}", recv_buffer, actual);
    }

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
    Ok(socket)
}
