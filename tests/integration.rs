//! Integration tests for natsd
//!
//! Each test starts a broker on its own port and drives it over raw TCP
//! with protocol text, the way a client library would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use natsd::auth::AuthProvider;
use natsd::broker::{Broker, BrokerConfig};
use natsd::codec::find_crlf;
use natsd::config::AuthConfig;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(24000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Test configuration helper
fn test_config(port: u16) -> BrokerConfig {
    BrokerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], port)),
        max_connections: 100,
        verbose: false,
        ..Default::default()
    }
}

async fn start_broker(broker: Broker) -> (Arc<Broker>, SocketAddr) {
    let addr = broker.config().bind_addr;
    let broker = Arc::new(broker);
    let running = broker.clone();
    tokio::spawn(async move {
        let _ = running.run().await;
    });

    // Give broker time to start
    tokio::time::sleep(Duration::from_millis(100)).await;
    (broker, addr)
}

/// Poll until `check` holds or the deadline passes
async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Line-oriented client for tests
struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    /// Connect without consuming the INFO banner
    async fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Connect and consume the INFO banner
    async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr).await;
        let info = client.read_line().await.expect("Expected INFO banner");
        assert!(info.starts_with("INFO {"), "unexpected banner: {}", info);
        client
    }

    async fn send(&mut self, data: &str) {
        self.send_bytes(data.as_bytes()).await;
    }

    async fn send_bytes(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.expect("Failed to write");
    }

    /// Read more bytes; false on EOF, error or timeout
    async fn fill(&mut self) -> bool {
        match timeout(Duration::from_secs(2), self.stream.read_buf(&mut self.buf)).await {
            Ok(Ok(n)) => n > 0,
            _ => false,
        }
    }

    /// Next CR-LF terminated line, without the terminator
    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = self.buf.split_to(pos);
                self.buf.advance(2);
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    async fn expect_line(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line.as_deref(), Some(expected));
    }

    /// Read one MSG frame, returning its header line and payload
    async fn read_msg(&mut self) -> (String, Vec<u8>) {
        let header = self.read_line().await.expect("Expected MSG");
        assert!(header.starts_with("MSG "), "expected MSG, got {}", header);
        let size: usize = header
            .rsplit(' ')
            .next()
            .and_then(|s| s.parse().ok())
            .expect("MSG size");

        while self.buf.len() < size + 2 {
            assert!(self.fill().await, "connection closed mid-payload");
        }
        let payload = self.buf.split_to(size).to_vec();
        assert_eq!(&self.buf[..2], b"\r\n");
        self.buf.advance(2);
        (header, payload)
    }

    /// Round trip a PING so everything sent before it has been processed
    async fn sync(&mut self) {
        self.send("PING\r\n").await;
        self.expect_line("PONG").await;
    }

    /// Whether the server closes the connection, draining anything still in flight
    async fn closed_by_server(&mut self) -> bool {
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match timeout(Duration::from_secs(5), self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    /// Whether nothing arrives within a short window
    async fn silent(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        let mut chunk = [0u8; 64];
        !matches!(
            timeout(Duration::from_millis(200), self.stream.read(&mut chunk)).await,
            Ok(Ok(n)) if n > 0
        )
    }
}

// ============================================================================
// Banner, PING/PONG, verbose
// ============================================================================

#[tokio::test]
async fn test_info_banner_on_connect() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect_raw(addr).await;
    let line = client.read_line().await.expect("Expected INFO");
    let json = line.strip_prefix("INFO ").expect("INFO prefix");
    let info: serde_json::Value = serde_json::from_str(json).unwrap();

    assert_eq!(info["port"], port);
    assert_eq!(info["auth_required"], false);
    assert_eq!(info["max_payload"], 1024 * 1024);
    assert!(info["server_id"].as_str().is_some_and(|id| !id.is_empty()));

    // INFO on request repeats the banner
    client.send("INFO\r\n").await;
    assert_eq!(client.read_line().await, Some(line));
}

#[tokio::test]
async fn test_ping_pong() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("PING\r\n").await;
    client.expect_line("PONG").await;

    // Case-insensitive keywords
    client.send("ping\r\n").await;
    client.expect_line("PONG").await;
}

#[tokio::test]
async fn test_server_ping_broadcast() {
    let port = next_port();
    let config = BrokerConfig {
        ping_interval: Duration::from_millis(100),
        ..test_config(port)
    };
    let (_broker, addr) = start_broker(Broker::new(config)).await;

    let mut client = TestClient::connect(addr).await;
    client.expect_line("PING").await;
    client.send("PONG\r\n").await;

    // Keeps ticking, and the PONG reply draws no response
    client.expect_line("PING").await;
}

#[tokio::test]
async fn test_server_ping_disabled() {
    let port = next_port();
    let config = BrokerConfig {
        ping_interval: Duration::ZERO,
        ..test_config(port)
    };
    let (_broker, addr) = start_broker(Broker::new(config)).await;

    let mut client = TestClient::connect(addr).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.silent().await);
}

#[tokio::test]
async fn test_verbose_acknowledgements() {
    let port = next_port();
    let config = BrokerConfig {
        verbose: true,
        ..test_config(port)
    };
    let (_broker, addr) = start_broker(Broker::new(config)).await;

    let mut client = TestClient::connect(addr).await;
    client.send("CONNECT {}\r\n").await;
    client.expect_line("+OK").await;

    client.send("SUB foo 1\r\n").await;
    client.expect_line("+OK").await;

    client.send("PUB foo 2\r\nhi\r\n").await;
    let (header, payload) = client.read_msg().await;
    assert_eq!(header, "MSG foo 1 2");
    assert_eq!(payload, b"hi");
    client.expect_line("+OK").await;

    // CONNECT can switch acknowledgements off
    client.send("CONNECT {\"verbose\":false}\r\n").await;
    client.sync().await;
    client.send("UNSUB 1\r\n").await;
    client.sync().await;
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_wildcard_fan_out() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut subs = Vec::new();
    for pattern in ["foo.bar", "foo.*", "*.bar", "foo.>", "baz"] {
        let mut client = TestClient::connect(addr).await;
        client.send(&format!("SUB {} 1\r\n", pattern)).await;
        client.sync().await;
        subs.push(client);
    }

    let mut publisher = TestClient::connect(addr).await;
    publisher.send("PUB foo.bar 5\r\nhello\r\n").await;
    publisher.sync().await;

    for sub in subs.iter_mut().take(4) {
        let (header, payload) = sub.read_msg().await;
        assert_eq!(header, "MSG foo.bar 1 5");
        assert_eq!(payload, b"hello");
    }
    assert!(subs[4].silent().await);
}

#[tokio::test]
async fn test_reply_subject_forwarded() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut sub = TestClient::connect(addr).await;
    sub.send("SUB service.echo 42\r\n").await;
    sub.sync().await;

    let mut publisher = TestClient::connect(addr).await;
    publisher.send("PUB service.echo inbox.7 3\r\nabc\r\n").await;

    let (header, payload) = sub.read_msg().await;
    assert_eq!(header, "MSG service.echo 42 inbox.7 3");
    assert_eq!(payload, b"abc");
}

#[tokio::test]
async fn test_per_publisher_ordering() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut sub = TestClient::connect(addr).await;
    sub.send("SUB seq 1\r\n").await;
    sub.sync().await;

    let mut publisher = TestClient::connect(addr).await;
    let mut batch = String::new();
    for i in 0..200 {
        let body = i.to_string();
        batch.push_str(&format!("PUB seq {}\r\n{}\r\n", body.len(), body));
    }
    publisher.send(&batch).await;

    for i in 0..200 {
        let (_, payload) = sub.read_msg().await;
        assert_eq!(payload, i.to_string().as_bytes());
    }
}

#[tokio::test]
async fn test_payload_with_crlf_and_empty_payload() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("SUB data 1\r\n").await;
    client.send("PUB data 6\r\na\r\nb\r\n\r\n").await;
    client.send("PUB data 0\r\n\r\n").await;

    let (_, payload) = client.read_msg().await;
    assert_eq!(payload, b"a\r\nb\r\n");
    let (header, payload) = client.read_msg().await;
    assert_eq!(header, "MSG data 1 0");
    assert!(payload.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("SUB foo 1\r\nUNSUB 1\r\nPUB foo 2\r\nhi\r\n").await;
    client.sync().await;
    assert_eq!(broker.subscription_count(), 0);
    assert!(client.silent().await);
}

// ============================================================================
// Error handling
// ============================================================================

#[tokio::test]
async fn test_sid_errors() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("SUB foo 1\r\nSUB bar 1\r\n").await;
    client
        .expect_line("-ERR 'Invalid Subject Identifier (sid), already taken'")
        .await;

    client.send("UNSUB 9\r\n").await;
    client
        .expect_line("-ERR 'Invalid Subject-Identifier (sid), no subscriber registered'")
        .await;

    // Connection survives both
    client.sync().await;
    assert_eq!(broker.subscription_count(), 1);

    // The original subscription is untouched and the rejected one was never added
    client.send("PUB foo 2\r\nhi\r\nPUB bar 2\r\nno\r\n").await;
    let (header, payload) = client.read_msg().await;
    assert_eq!(header, "MSG foo 1 2");
    assert_eq!(payload, b"hi");
    client.sync().await;
    assert!(client.silent().await);
}

#[tokio::test]
async fn test_invalid_subject_pedantic() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("SUB foo..bar 1\r\n").await;
    client.expect_line("-ERR 'Invalid Subject'").await;

    client.send("PUB foo.* 1\r\nx\r\n").await;
    client.expect_line("-ERR 'Invalid Subject'").await;

    client.sync().await;
    assert_eq!(broker.subscription_count(), 0);
}

#[tokio::test]
async fn test_connect_disables_pedantic() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    // Default connections validate strictly
    let mut strict = TestClient::connect(addr).await;
    strict.send("SUB foo..bar 1\r\n").await;
    strict.expect_line("-ERR 'Invalid Subject'").await;
    strict.sync().await;

    let mut lenient = TestClient::connect(addr).await;
    lenient.send("CONNECT {\"pedantic\":false}\r\n").await;
    lenient.send("SUB foo..bar 1\r\nSUB a.* 2\r\n").await;
    lenient.sync().await;
    assert_eq!(broker.subscription_count(), 2);

    lenient.send("PUB foo..bar 2\r\nhi\r\nPUB a.* 1\r\nx\r\n").await;
    let (header, payload) = lenient.read_msg().await;
    assert_eq!(header, "MSG foo..bar 1 2");
    assert_eq!(payload, b"hi");
    let (header, payload) = lenient.read_msg().await;
    assert_eq!(header, "MSG a.* 2 1");
    assert_eq!(payload, b"x");

    // The strict connection still rejects the same publish
    strict.send("PUB foo..bar 2\r\nhi\r\n").await;
    strict.expect_line("-ERR 'Invalid Subject'").await;
    strict.sync().await;
    assert!(lenient.silent().await);
}

#[tokio::test]
async fn test_unknown_operation_continues() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("FOO bar\r\n").await;
    client.expect_line("-ERR 'Unknown Protocol Operation'").await;
    client.sync().await;
}

#[tokio::test]
async fn test_invalid_connect_options_continue() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("CONNECT {not json\r\n").await;
    client
        .expect_line("-ERR 'Invalid config, valid JSON required for connection configuration'")
        .await;
    client.sync().await;
}

#[tokio::test]
async fn test_payload_too_big_closes_connection() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("PUB foo 1048577\r\n").await;
    client
        .expect_line("-ERR 'Payload size exceeded, max is 1048576 bytes'")
        .await;
    assert!(client.closed_by_server().await);
}

#[tokio::test]
async fn test_control_line_too_long_closes_connection() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    let line = format!("SUB {} 1", "a".repeat(2048));
    client.send(&line).await;
    client
        .expect_line("-ERR 'Maximum control line exceeded, max is 1024 bytes'")
        .await;
    assert!(client.closed_by_server().await);
}

// ============================================================================
// Authorization
// ============================================================================

fn auth_provider() -> AuthProvider {
    AuthProvider::new(&AuthConfig {
        required: true,
        user: Some("derek".to_string()),
        password: Some("foobar".to_string()),
        ..Default::default()
    })
}

fn auth_config(port: u16) -> BrokerConfig {
    BrokerConfig {
        auth_timeout: Duration::from_millis(300),
        ..test_config(port)
    }
}

#[tokio::test]
async fn test_auth_success() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::with_auth(auth_config(port), auth_provider())).await;

    let mut client = TestClient::connect_raw(addr).await;
    let info = client.read_line().await.expect("Expected INFO");
    assert!(info.contains("\"auth_required\":true"));

    client
        .send("CONNECT {\"user\":\"derek\",\"pass\":\"foobar\"}\r\n")
        .await;
    client.send("SUB foo 1\r\nPUB foo 2\r\nok\r\n").await;
    let (_, payload) = client.read_msg().await;
    assert_eq!(payload, b"ok");

    // Past the deadline the connection stays open
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.sync().await;
}

#[tokio::test]
async fn test_auth_failure_closes_connection() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::with_auth(auth_config(port), auth_provider())).await;

    let mut client = TestClient::connect(addr).await;
    client
        .send("CONNECT {\"user\":\"derek\",\"pass\":\"wrong\"}\r\n")
        .await;
    client.expect_line("-ERR 'Authorization failed'").await;
    assert!(client.closed_by_server().await);
}

#[tokio::test]
async fn test_command_before_auth_rejected() {
    let port = next_port();
    let (_broker, addr) = start_broker(Broker::with_auth(auth_config(port), auth_provider())).await;

    let mut client = TestClient::connect(addr).await;
    // PING is allowed before CONNECT
    client.sync().await;
    client.send("SUB foo 1\r\n").await;
    client.expect_line("-ERR 'Authorization is required'").await;
    assert!(client.closed_by_server().await);
}

#[tokio::test]
async fn test_auth_timeout() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::with_auth(auth_config(port), auth_provider())).await;

    let mut client = TestClient::connect(addr).await;
    client.expect_line("-ERR 'Authorization is required'").await;
    assert!(client.closed_by_server().await);
    assert!(wait_for(|| broker.connection_count() == 0).await);
}

// ============================================================================
// Resource limits and cleanup
// ============================================================================

#[tokio::test]
async fn test_max_connections() {
    let port = next_port();
    let config = BrokerConfig {
        max_connections: 1,
        ..test_config(port)
    };
    let (broker, addr) = start_broker(Broker::new(config)).await;

    let mut first = TestClient::connect(addr).await;
    first.sync().await;

    // The second socket is accepted and dropped without a banner
    let mut second = TestClient::connect_raw(addr).await;
    assert!(second.read_line().await.is_none());

    drop(first);
    assert!(wait_for(|| broker.connection_count() == 0).await);
    // The slot is released when the connection task exits
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut third = TestClient::connect(addr).await;
    third.sync().await;
}

#[tokio::test]
async fn test_disconnect_removes_subscriptions() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.send("SUB foo 1\r\nSUB bar.> 2\r\n").await;
    client.sync().await;
    assert_eq!(broker.subscription_count(), 2);
    assert_eq!(broker.connection_count(), 1);

    drop(client);
    assert!(wait_for(|| broker.subscription_count() == 0).await);
    assert!(wait_for(|| broker.connection_count() == 0).await);

    // Publishing to the vacated subject is harmless
    let mut publisher = TestClient::connect(addr).await;
    publisher.send("PUB foo 1\r\nx\r\n").await;
    publisher.sync().await;
}

#[tokio::test]
async fn test_slow_consumer_dropped() {
    let port = next_port();
    let config = BrokerConfig {
        max_outbound: 128 * 1024,
        ..test_config(port)
    };
    let (broker, addr) = start_broker(Broker::new(config)).await;

    // Never reads until the broker gives up on it
    let mut slow = TestClient::connect(addr).await;
    slow.send("SUB firehose 1\r\n").await;
    slow.sync().await;

    let mut publisher = TestClient::connect(addr).await;
    let payload = vec![b'x'; 64 * 1024];
    let mut frame = BytesMut::new();
    frame.extend_from_slice(format!("PUB firehose {}\r\n", payload.len()).as_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(b"\r\n");

    // Far more than the socket buffers on both ends can absorb
    for _ in 0..1024 {
        publisher.send_bytes(&frame).await;
        if broker.connection_count() == 1 {
            break;
        }
    }

    assert!(wait_for(|| broker.connection_count() == 1).await);
    assert!(slow.closed_by_server().await);

    // The publisher is unaffected
    publisher.sync().await;
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let port = next_port();
    let (broker, addr) = start_broker(Broker::new(test_config(port))).await;

    let mut client = TestClient::connect(addr).await;
    client.sync().await;

    broker.shutdown();
    assert!(client.closed_by_server().await);
    assert!(wait_for(|| broker.connection_count() == 0).await);
}
