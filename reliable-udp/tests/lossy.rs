//! End-to-end delivery over a simulated lossy, duplicating network.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reliable_udp::simulator::{LossyTransport, SimulatorConfig};
use reliable_udp::socket::UdpTransport;
use reliable_udp::{ReliableSocket, RetransmitConfig};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn lossy_socket(config: SimulatorConfig) -> ReliableSocket<LossyTransport<UdpTransport>> {
    let udp = UdpTransport::bind(loopback()).await.expect("bind");
    let retransmit = RetransmitConfig::default().with_timeout(Duration::from_millis(20));
    ReliableSocket::from_transport(LossyTransport::new(udp, config), retransmit)
}

#[tokio::test]
async fn every_reliable_message_arrives_despite_loss() {
    const MESSAGES: u8 = 20;

    // Client loses data packets; server loses and duplicates acks.
    let client = lossy_socket(SimulatorConfig {
        loss_rate: 0.3,
        duplicate_rate: 0.0,
        seed: 42,
    })
    .await;
    let server = lossy_socket(SimulatorConfig {
        loss_rate: 0.3,
        duplicate_rate: 0.2,
        seed: 7,
    })
    .await;
    let server_addr = server.local_addr().unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let srv = server.clone();
    let server_task = tokio::spawn(async move {
        while let Ok((data, _)) = srv.recv_from().await {
            sink.lock().unwrap().push(data);
        }
    });
    let cli = client.clone();
    let client_task = tokio::spawn(async move { while cli.recv_from().await.is_ok() {} });

    for i in 0..MESSAGES {
        client.send_to(&[i], server_addr, true).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while client.pending_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} packets still unacknowledged",
            client.pending_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.close();
    server.close();
    client_task.await.unwrap();
    server_task.await.unwrap();

    let delivered = delivered.lock().unwrap();
    let unique: HashSet<u8> = delivered.iter().map(|d| d[0]).collect();
    assert_eq!(unique, (0..MESSAGES).collect::<HashSet<_>>());
    // Lost acks force resends of packets that already arrived.
    assert!(delivered.len() >= MESSAGES as usize);

    let client_stats = client.transport().stats();
    assert!(client_stats.dropped() > 0, "seeded loss never triggered");
    assert!(client_stats.sent() > u64::from(MESSAGES));
}

#[tokio::test]
async fn unreliable_messages_may_be_lost_and_are_not_resent() {
    let client = lossy_socket(SimulatorConfig {
        loss_rate: 1.0,
        duplicate_rate: 0.0,
        seed: 1,
    })
    .await;
    let server = ReliableSocket::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();

    // A dropped datagram still reports the framed length as written.
    assert_eq!(client.send_to(b"gone", server_addr, false).await.unwrap(), 5);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.transport().stats().dropped(), 1);

    let got = tokio::time::timeout(Duration::from_millis(100), server.recv_from()).await;
    assert!(got.is_err(), "dropped datagram was delivered");
}

#[tokio::test]
async fn duplicated_data_is_delivered_twice() {
    let client = lossy_socket(SimulatorConfig {
        loss_rate: 0.0,
        duplicate_rate: 1.0,
        seed: 3,
    })
    .await;
    let server = ReliableSocket::bind(loopback()).await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let cli = client.clone();
    let client_task = tokio::spawn(async move { while cli.recv_from().await.is_ok() {} });

    client.send_to(b"twice", server_addr, true).await.unwrap();
    assert_eq!(server.recv_from().await.unwrap().0, b"twice");
    assert_eq!(server.recv_from().await.unwrap().0, b"twice");

    // The second ack finds nothing pending and is ignored.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while client.pending_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.pending_count(), 0);

    client.close();
    client_task.await.unwrap();
}
