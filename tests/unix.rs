use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use connstate::{listen_conn_state, ConnState};
use tempdir::TempDir;

fn eventually<F: Fn() -> bool>(f: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

fn pair(dir: &TempDir) -> (UnixStream, UnixStream) {
    let _ = env_logger::try_init();
    let path = dir.path().join("sock");
    let ln = UnixListener::bind(&path).unwrap();
    let client = UnixStream::connect(&path).unwrap();
    let (server, _) = ln.accept().unwrap();
    (client, server)
}

#[test]
fn unix_peer_close_is_detected() {
    let dir = TempDir::new("connstate").unwrap();
    let (client, mut server) = pair(&dir);

    let stater = listen_conn_state(client).unwrap();
    assert_eq!(stater.state(), ConnState::Ok);

    server.write_all(b"ping").unwrap();
    drop(server);
    assert!(eventually(|| stater.state() == ConnState::RemoteClosed));

    let mut buf = Vec::new();
    let mut stream = stater.get_ref();
    stream.read_to_end(&mut buf).unwrap();
    assert_eq!(&buf[..], b"ping");

    stater.close().unwrap();
    assert_eq!(stater.state(), ConnState::Closed);
}

#[test]
fn shared_connection_outlives_monitoring() {
    let dir = TempDir::new("connstate").unwrap();
    let (client, mut server) = pair(&dir);
    let client = Arc::new(client);

    let stater = listen_conn_state(client.clone()).unwrap();
    stater.close().unwrap();
    assert_eq!(stater.state(), ConnState::Closed);
    drop(stater);

    // the shared handle is still open, but shut down in both directions
    let mut buf = [0; 1];
    assert_eq!((&*client).read(&mut buf).unwrap(), 0);
    assert_eq!(server.read(&mut buf).unwrap(), 0);
}
