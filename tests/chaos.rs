#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Chaos tests
//! Packet loss, garbage input and unresponsive peers

use message_template::config::NetworkConfig;
use message_template::core::value::FieldValue;
use message_template::schema::compiler::compile;
use message_template::schema::Catalogue;
use message_template::Transport;
use rand::Rng;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;

const TEMPLATE: &str = r#"
{
    PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded
    {
        Packets Variable
        {   ID      U32 }
    }
}
{
    UseCircuitCode Low 3 NotTrusted Unencoded
    {
        CircuitCode Single
        {   Code    U32 }
    }
}
{
    ChatFromViewer Low 80 NotTrusted Zerocoded
    {
        ChatData Single
        {   Message Variable 2 }
        {   Channel S32 }
    }
}
"#;

fn catalogue() -> Arc<Catalogue> {
    Arc::new(compile(TEMPLATE).unwrap())
}

fn config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.transport.bind_address = "127.0.0.1:0".to_string();
        c.transport.poll_interval = Duration::from_millis(10);
        c.circuit.ack_flush_interval = Duration::from_millis(20);
        c.circuit.resend_timeout = Duration::from_millis(50);
        c.circuit.max_resend_count = 100;
    })
}

async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Forward datagrams between the first client seen and `server`, dropping
/// each one with probability `loss`
async fn lossy_relay(server: SocketAddr, loss: f32) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut client: Option<SocketAddr> = None;
        let mut buf = vec![0u8; 65_536];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                continue;
            };
            let target = if from == server {
                match client {
                    Some(client) => client,
                    None => continue,
                }
            } else {
                client = Some(from);
                server
            };
            if rand::rng().random::<f32>() < loss {
                continue;
            }
            let _ = socket.send_to(&buf[..len], target).await;
        }
    });
    addr
}

// ============================================================================
// PACKET LOSS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reliable_delivery_over_lossy_link() {
    const PACKETS: i32 = 30;

    let server = Transport::bind(config(), catalogue()).await.unwrap();
    let client = Transport::bind(config(), catalogue()).await.unwrap();

    let channels = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&channels);
    server
        .register_handler("ChatFromViewer", move |packet, _| {
            if let Some(FieldValue::S32(channel)) = packet.field("ChatData", 0, "Channel") {
                seen.lock().unwrap().push(*channel);
            }
            Ok(())
        })
        .unwrap();

    let relay = lossy_relay(server.local_addr().unwrap(), 0.3).await;
    let code = server.reserve_circuit().unwrap();
    let circuit = client.connect(relay, code).await.unwrap();

    for i in 0..PACKETS {
        let mut chat = client.packet("ChatFromViewer").unwrap();
        chat.set_field("ChatData", 0, "Channel", FieldValue::S32(i)).unwrap();
        client.send(&circuit, chat, true).await.unwrap();
    }

    let delivered = wait_until(Duration::from_secs(20), || {
        channels.lock().unwrap().len() >= PACKETS as usize && circuit.unacked_count() == 0
    })
    .await;
    assert!(delivered, "not every reliable packet made it across");

    // resends across the lossy link must never dispatch twice
    tokio::time::sleep(Duration::from_millis(200)).await;
    let channels = channels.lock().unwrap().clone();
    assert_eq!(channels.len(), PACKETS as usize);
    let unique: BTreeSet<i32> = channels.into_iter().collect();
    assert_eq!(unique, (0..PACKETS).collect());
    assert!(client.metrics().resends_sent > 0);

    server.shutdown().await.unwrap();
    client.shutdown().await.unwrap();
}

// ============================================================================
// GARBAGE INPUT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_garbage_datagrams_do_not_stop_receiver() {
    const GARBAGE: u64 = 200;

    let server = Transport::bind(config(), catalogue()).await.unwrap();
    let server_addr = server.local_addr().unwrap();

    let attacker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for _ in 0..GARBAGE {
        let payload: Vec<u8> = {
            let mut rng = rand::rng();
            let len = rng.random_range(1..64);
            (0..len).map(|_| rng.random()).collect()
        };
        attacker.send_to(&payload, server_addr).await.unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            let m = server.metrics();
            m.malformed + m.unknown_circuit == GARBAGE
        })
        .await
    );

    // a well-behaved client still gets through afterwards
    let client = Transport::bind(config(), catalogue()).await.unwrap();
    let code = server.reserve_circuit().unwrap();
    let circuit = client.connect(server_addr, code).await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || circuit.unacked_count() == 0).await);
    assert_eq!(server.circuits().unwrap().len(), 1);

    server.shutdown().await.unwrap();
    client.shutdown().await.unwrap();
}

// ============================================================================
// UNRESPONSIVE PEER
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unacked_packet_dropped_after_max_resends() {
    let client = Transport::bind(
        NetworkConfig::default_with_overrides(|c| {
            c.transport.bind_address = "127.0.0.1:0".to_string();
            c.circuit.ack_flush_interval = Duration::from_millis(20);
            c.circuit.resend_timeout = Duration::from_millis(20);
            c.circuit.max_resend_count = 2;
        }),
        catalogue(),
    )
    .await
    .unwrap();

    // bound but never answers
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let circuit = client
        .connect(silent.local_addr().unwrap(), 7)
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || client.metrics().resends_dropped == 1).await);
    assert_eq!(client.metrics().resends_sent, 2);
    assert_eq!(circuit.unacked_count(), 0);

    // the original plus two resends, the resends flagged as such
    let mut buf = vec![0u8; 1500];
    let mut flags = Vec::new();
    for _ in 0..3 {
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), silent.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(len > 0);
        flags.push(buf[0]);
    }
    assert_eq!(flags[0] & 0x20, 0);
    assert_ne!(flags[1] & 0x20, 0);
    assert_ne!(flags[2] & 0x20, 0);

    client.shutdown().await.unwrap();
}
