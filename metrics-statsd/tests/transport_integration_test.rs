use std::{
    io::{self, Read as _},
    net::{TcpListener, UdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use metrics_statsd::{BuildError, Error, Network, StatsdBuilder, TagFormat, Transport};

fn udp_server() -> (UdpSocket, String) {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let addr = server.local_addr().unwrap().to_string();
    (server, addr)
}

fn recv_packet(server: &UdpSocket) -> String {
    let mut buf = [0u8; 2048];
    let n = server.recv(&mut buf).unwrap_or_else(|e| panic!("failed to receive packet: {e}"));
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[test]
fn udp_explicit_flush() {
    let (server, addr) = udp_server();
    let client = StatsdBuilder::default()
        .with_remote_address(addr)
        .with_flush_interval(Duration::ZERO)
        .with_prefix("app")
        .with_tag_format(TagFormat::Datadog)
        .with_tags(&["env", "test"])
        .unwrap()
        .build()
        .unwrap();

    client.increment("requests");
    client.gauge("temperature", -3);
    client.unique("users", "alice");
    client.flush();

    assert_eq!(
        recv_packet(&server),
        "app.requests:1|c|#env:test\napp.temperature:0|g|#env:test\napp.temperature:-3|g|#env:test\napp.users:alice|s|#env:test"
    );

    let stats = client.stats();
    assert_eq!(stats.packets_sent, 1);
    client.close();
}

#[test]
fn udp_flush_interval() {
    let (server, addr) = udp_server();
    let client = StatsdBuilder::default()
        .with_remote_address(addr)
        .with_flush_interval(Duration::from_millis(50))
        .build()
        .unwrap();

    client.timing("latency", 12);

    // No explicit flush: the background timer sends it.
    assert_eq!(recv_packet(&server), "latency:12|ms");
    client.close();
}

#[test]
fn udp_overflow_sends_full_packets() {
    let (server, addr) = udp_server();
    let client = StatsdBuilder::default()
        .with_remote_address(addr)
        .with_flush_interval(Duration::ZERO)
        .with_maximum_packet_size(20)
        .build()
        .unwrap();

    client.increment("foo");
    client.increment("bar");
    client.increment("baz");
    assert_eq!(recv_packet(&server), "foo:1|c\nbar:1|c");

    client.close();
    assert_eq!(recv_packet(&server), "baz:1|c");
}

#[test]
fn udp_without_listener_still_builds() {
    let (server, addr) = udp_server();
    drop(server);

    let client = StatsdBuilder::default().with_remote_address(addr).build().unwrap();
    assert!(!client.is_muted());

    client.increment("requests");
    client.close();
}

#[test]
fn udp_scheme_and_local_shorthand() {
    let (server, addr) = udp_server();
    let port = addr.rsplit(':').next().unwrap();

    let client = StatsdBuilder::default()
        .with_network(Network::Tcp)
        .with_remote_address(format!("udp://:{port}"))
        .with_flush_interval(Duration::ZERO)
        .build()
        .unwrap();

    client.histogram("size", 2.5);
    client.flush();
    assert_eq!(recv_packet(&server), "size:2.5|h");
}

#[test]
fn tcp_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = StatsdBuilder::default()
        .with_network(Network::Tcp)
        .with_remote_address(addr)
        .with_flush_interval(Duration::ZERO)
        .with_tag_format(TagFormat::InfluxDb)
        .build()
        .unwrap();
    let (mut conn, _) = listener.accept().unwrap();

    client.count_with_tags("hits", 2, &["route", "home"]).unwrap();
    client.flush();
    client.gauge("load", 0.75);
    client.close();

    let mut received = String::new();
    conn.read_to_string(&mut received).unwrap();
    assert_eq!(received, "hits,route=home:2|c\nload:0.75|g\n");
}

#[test]
fn tcp_without_listener_is_muted() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = StatsdBuilder::default().with_network(Network::Tcp).with_remote_address(addr.clone()).build();
    let error = match result {
        Err(e @ BuildError::Connection { .. }) => e,
        other => panic!("expected connection error, got {other:?}"),
    };
    assert!(error.to_string().contains(&addr));

    let client = error.into_client();
    assert!(client.is_muted());

    // A muted client behaves like any other, it just doesn't send anything.
    client.increment("requests");
    client.count_with_tags("requests", 1, &["a", "b"]).unwrap();
    client.flush();
    client.close();

    let client = StatsdBuilder::default().with_network(Network::Tcp).with_remote_address(addr).build_or_mute();
    assert!(client.is_muted());
}

#[cfg(unix)]
#[test]
fn unix_datagram() {
    use std::os::unix::net::UnixDatagram;

    let path = std::env::temp_dir().join(format!("metrics-statsd-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let server = UnixDatagram::bind(&path).unwrap();
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let client = StatsdBuilder::default()
        .with_remote_address(format!("unixgram://{}", path.display()))
        .with_flush_interval(Duration::ZERO)
        .build()
        .unwrap();

    client.increment("requests");
    client.close();

    let mut buf = [0u8; 256];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"requests:1|c");

    let _ = std::fs::remove_file(&path);
}

struct FlakyTransport {
    fail_next: Arc<AtomicUsize>,
    packets: Arc<Mutex<Vec<String>>>,
}

impl Transport for FlakyTransport {
    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }

        self.packets.lock().unwrap().push(String::from_utf8_lossy(packet).into_owned());
        Ok(())
    }
}

#[test]
fn write_errors_go_to_handler() {
    let fail_next = Arc::new(AtomicUsize::new(1));
    let packets = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let handler_errors = Arc::clone(&errors);
    let client = StatsdBuilder::default()
        .with_flush_interval(Duration::ZERO)
        .with_error_handler(move |e: Error| handler_errors.lock().unwrap().push(e))
        .build_with_transport(Box::new(FlakyTransport {
            fail_next: Arc::clone(&fail_next),
            packets: Arc::clone(&packets),
        }))
        .unwrap();

    client.increment("lost");
    client.flush();

    {
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::Write(_)));
    }

    client.increment("kept");
    client.flush();
    assert_eq!(*packets.lock().unwrap(), vec!["kept:1|c".to_string()]);
    assert_eq!(errors.lock().unwrap().len(), 1);

    let stats = client.stats();
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.packets_dropped, 1);
}
