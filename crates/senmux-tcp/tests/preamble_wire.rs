//! End-to-end check of the "preamble-before-payload" testable property
//! (spec.md §8): the first bytes on a freshly connected socket are exactly
//! the parsed preamble, byte for byte.

use std::io::Read;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use senmux_tcp::connector::connect;
use senmux_tcp::preamble::parse_preamble;
use senmux_tcp::tuning::TuningConfig;

#[test]
fn preamble_is_the_first_thing_written_on_connect() {
    let raw = r#"?WATCH={\"enable\":true}\r\n"#;
    let expected = parse_preamble(raw).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let expected_len = expected.len();
    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = vec![0u8; expected_len];
        sock.read_exact(&mut buf).unwrap();
        buf
    });

    let stream = connect(
        &addr.ip().to_string(),
        &addr.port().to_string(),
        Some(&expected),
        &TuningConfig::default(),
        Duration::from_millis(10),
        false,
    )
    .unwrap();

    let received = server.join().unwrap();
    assert_eq!(received, expected);
    drop(stream);
}

#[test]
fn preamble_is_resent_verbatim_on_every_reconnect() {
    use senmux_tcp::shared::SharedBlock;
    use std::sync::Arc;

    let raw = "HELLO\\r\\n";
    let expected = parse_preamble(raw).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let first = connect(
        &addr.ip().to_string(),
        &addr.port().to_string(),
        Some(&expected),
        &TuningConfig::default(),
        Duration::from_millis(10),
        false,
    )
    .unwrap();
    let (first_peer, _) = listener.accept().unwrap();
    {
        let mut buf = vec![0u8; expected.len()];
        (&first_peer).read_exact(&mut buf).unwrap();
        assert_eq!(buf, expected);
    }

    let shared = Arc::new(SharedBlock::new(
        addr.ip().to_string(),
        addr.port().to_string(),
        Some(expected.clone()),
        Duration::from_millis(5),
        TuningConfig::default(),
        Some(first),
    ));

    drop(first_peer); // force a read failure on the client's side

    let expected_len = expected.len();
    let accept_second = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = vec![0u8; expected_len];
        sock.read_exact(&mut buf).unwrap();
        buf
    });

    let mut buf = [0u8; 8];
    // Drains the coordinator's repair path; the repair itself re-runs the
    // connector (with the same preamble) and installs the new stream.
    let _ = senmux_tcp::reader::read_tcp(&shared, &mut buf);

    let received_again = accept_second.join().unwrap();
    assert_eq!(received_again, expected);
}
