//! # TCP Gateway Integration Tests
//!
//! End-to-end tests over real loopback sockets: one gateway, scripted
//! backends, and plain TCP clients. Backends identify themselves by writing
//! their id before half-closing, which lets the tests observe dial order
//! through the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use mq_gateway::load_balancing::RoundRobinBalancer;
use mq_gateway::{Gateway, ServiceEntry, ServiceMap, TcpGateway};

fn entry(id: &str, address: SocketAddr, protocol: &str) -> ServiceEntry {
    ServiceEntry {
        id: id.to_string(),
        address: address.to_string(),
        protocol_hint: protocol.to_string(),
        last_seen_version: 0,
    }
}

fn gateway_for(
    protocol: &str,
    service_map: Arc<ServiceMap>,
    balancer: Arc<RoundRobinBalancer>,
) -> TcpGateway {
    TcpGateway::new(
        protocol,
        Some("127.0.0.1".to_string()),
        0,
        service_map,
        balancer,
        Duration::from_millis(500),
    )
}

/// Backend that announces its id, half-closes its write side, then drains
/// whatever the client still sends
async fn spawn_identifying_backend(id: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = stream.write_all(id.as_bytes()).await;
                let _ = stream.shutdown().await;
                let mut sink = Vec::new();
                let _ = stream.read_to_end(&mut sink).await;
            });
        }
    });
    addr
}

/// Backend that echoes bytes until the client closes
async fn spawn_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

async fn connect_and_read_id(gateway_addr: SocketAddr) -> String {
    let mut client = TcpStream::connect(gateway_addr).await.unwrap();
    let mut identity = String::new();
    client.read_to_string(&mut identity).await.unwrap();
    identity
}

#[tokio::test]
async fn test_round_robin_dial_order_over_two_backends() {
    let a = spawn_identifying_backend("a").await;
    let b = spawn_identifying_backend("b").await;

    let service_map = Arc::new(ServiceMap::new());
    service_map.put("tcp", entry("a", a, "tcp"));
    service_map.put("tcp", entry("b", b, "tcp"));

    let gateway = gateway_for("tcp", service_map, Arc::new(RoundRobinBalancer::new()));
    gateway.init().await.unwrap();
    let addr = gateway.local_addr().unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(connect_and_read_id(addr).await);
    }
    assert_eq!(order, vec!["a", "b", "a", "b"]);

    gateway.destroy().await.unwrap();
}

#[tokio::test]
async fn test_no_backend_closes_client_without_waiting() {
    let gateway = gateway_for(
        "tcp",
        Arc::new(ServiceMap::new()),
        Arc::new(RoundRobinBalancer::new()),
    );
    gateway.init().await.unwrap();
    let addr = gateway.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(2), client.read_to_end(&mut buf)).await;
    // Closed promptly with nothing forwarded; a reset instead of a clean FIN
    // is also acceptable
    match read.expect("connection should be closed, not held open") {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }

    gateway.destroy().await.unwrap();
}

#[tokio::test]
async fn test_protocol_keys_do_not_leak_across_gateways() {
    let backend = spawn_identifying_backend("p1-backend").await;

    let service_map = Arc::new(ServiceMap::new());
    let balancer = Arc::new(RoundRobinBalancer::new());
    service_map.put("p1", entry("p1-backend", backend, "p1"));

    let p1 = gateway_for("p1", service_map.clone(), balancer.clone());
    let p2 = gateway_for("p2", service_map, balancer);
    p1.init().await.unwrap();
    p2.init().await.unwrap();

    // The p1 backend serves p1 connections...
    assert_eq!(
        connect_and_read_id(p1.local_addr().unwrap()).await,
        "p1-backend"
    );

    // ...but is invisible to the p2 gateway sharing the same map
    let mut client = TcpStream::connect(p2.local_addr().unwrap()).await.unwrap();
    let mut buf = Vec::new();
    match timeout(Duration::from_secs(2), client.read_to_end(&mut buf))
        .await
        .expect("p2 connection should fail fast")
    {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }

    p1.destroy().await.unwrap();
    p2.destroy().await.unwrap();
}

#[tokio::test]
async fn test_dial_failover_within_one_snapshot() {
    // First snapshot entry is dead; routing must fall through to the live one
    let dead = {
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap()
    };
    let live = spawn_identifying_backend("live").await;

    let service_map = Arc::new(ServiceMap::new());
    service_map.put("tcp", entry("dead", dead, "tcp"));
    service_map.put("tcp", entry("live", live, "tcp"));

    let gateway = gateway_for("tcp", service_map, Arc::new(RoundRobinBalancer::new()));
    gateway.init().await.unwrap();

    let identity = timeout(
        Duration::from_secs(5),
        connect_and_read_id(gateway.local_addr().unwrap()),
    )
    .await
    .expect("routing must not hang on the dead backend");
    assert_eq!(identity, "live");

    gateway.destroy().await.unwrap();
}

#[tokio::test]
async fn test_half_close_from_backend_does_not_kill_client_writes() {
    // Backend greets, closes its write side, then keeps reading: the client
    // must see the greeting and EOF while still able to finish its upload.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap();
    let backend = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let service_map = Arc::new(ServiceMap::new());
    service_map.put("tcp", entry("backend", backend_addr, "tcp"));
    let gateway = gateway_for("tcp", service_map, Arc::new(RoundRobinBalancer::new()));
    gateway.init().await.unwrap();

    let mut client = TcpStream::connect(gateway.local_addr().unwrap())
        .await
        .unwrap();

    // Observe the backend's half-close as EOF after the greeting
    let mut greeting = Vec::new();
    timeout(Duration::from_secs(2), client.read_to_end(&mut greeting))
        .await
        .expect("client must observe end-of-stream")
        .unwrap();
    assert_eq!(greeting, b"hello");

    // The other direction is still open: finish writing after the EOF
    let upload = vec![42u8; 64 * 1024];
    client.write_all(&upload).await.unwrap();
    client.shutdown().await.unwrap();

    let received = timeout(Duration::from_secs(2), backend)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, upload);

    gateway.destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroy_unwinds_in_flight_proxy() {
    let backend = spawn_echo_backend().await;

    let service_map = Arc::new(ServiceMap::new());
    service_map.put("tcp", entry("echo", backend, "tcp"));
    let gateway = gateway_for("tcp", service_map, Arc::new(RoundRobinBalancer::new()));
    gateway.init().await.unwrap();

    let mut client = TcpStream::connect(gateway.local_addr().unwrap())
        .await
        .unwrap();

    // Confirm the proxy pair is established with one round trip
    client.write_all(b"ping").await.unwrap();
    let mut pong = [0u8; 4];
    client.read_exact(&mut pong).await.unwrap();
    assert_eq!(&pong, b"ping");

    gateway.destroy().await.unwrap();

    // The in-flight pair is torn down, not leaked
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("destroy must unblock the in-flight proxy loop");
    match read {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }
}

#[tokio::test]
async fn test_failed_handler_does_not_block_acceptance() {
    // One backend that is gone and one that answers: a connection that fails
    // routing must not stop the next connection from being accepted.
    let service_map = Arc::new(ServiceMap::new());
    let gateway = gateway_for("tcp", service_map.clone(), Arc::new(RoundRobinBalancer::new()));
    gateway.init().await.unwrap();
    let addr = gateway.local_addr().unwrap();

    // First connection fails: no backends yet
    let mut doomed = TcpStream::connect(addr).await.unwrap();
    let mut buf = Vec::new();
    let _ = timeout(Duration::from_secs(2), doomed.read_to_end(&mut buf)).await;

    // A backend appears; the next connection succeeds
    let live = spawn_identifying_backend("late").await;
    service_map.put("tcp", entry("late", live, "tcp"));
    assert_eq!(connect_and_read_id(addr).await, "late");

    gateway.destroy().await.unwrap();
}
