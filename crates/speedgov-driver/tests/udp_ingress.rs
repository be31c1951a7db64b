//! UDP 接入集成测试（回环 socket）

use speedgov_driver::{
    GovernorContext, IngressConfig, IngressListener, IngressTransport, ShutdownReason,
};
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_udp_datagrams() {
    let config = IngressConfig {
        transport: IngressTransport::Udp {
            listen: "127.0.0.1:0".parse().unwrap(),
        },
        poll_interval: Duration::from_millis(50),
        recv_buffer: 1024 * 1024,
        ..Default::default()
    };
    let listener = IngressListener::bind(&config).unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = GovernorContext::new();

    let worker = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || listener.run(&ctx))
    };

    // 无连接传输：启动即视为已连接
    assert!(wait_until(Duration::from_secs(5), || ctx
        .attachment
        .is_attached()));

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&[1, 2, 3], addr).unwrap();
    sender.send_to(&[1, 2, 3, 4, 5], addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.metrics.snapshot().malformed_messages == 2
    }));
    assert_eq!(ctx.distance.try_take_latest(), None);

    sender.send_to(&2.6f32.to_le_bytes(), addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.metrics.snapshot().samples_published == 1
    }));
    assert_eq!(ctx.distance.try_take_latest().map(|s| s.meters()), Some(2.6));

    // 非有限值同样丢弃
    sender.send_to(&f32::NAN.to_le_bytes(), addr).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        ctx.metrics.snapshot().malformed_messages == 3
    }));

    let start = Instant::now();
    ctx.shutdown.request(ShutdownReason::Interrupt);
    worker.join().unwrap().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!ctx.attachment.is_attached());
}
