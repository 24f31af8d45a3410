#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end session test against a scripted server: TCP connect, the
//! legacy logon handshake, entering chat, surviving an unknown frame, and
//! an orderly disconnect, with both pipeline threads doing the real work.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chatwire::config::{ChatwireConfig, LogonMethod, ProductKey};
use chatwire::core::FrameBuilder;
use chatwire::protocol::ids;
use chatwire::service::{Session, SessionEvent};

const FORMULA: &str = "A=443747131 B=3328179921 C=1040998290 4 A=A^S B=B-C C=C^A A=A+B";

fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(header[0], 0xFF, "client frame must carry the marker");
    let declared = u16::from_le_bytes([header[2], header[3]]) as usize;
    let mut payload = vec![0u8; declared - 4];
    stream.read_exact(&mut payload).unwrap();
    (header[1], payload)
}

fn send_frame(stream: &mut TcpStream, identifier: u8, build: impl FnOnce(&mut FrameBuilder)) {
    let mut builder = FrameBuilder::new(identifier);
    build(&mut builder);
    stream.write_all(&builder.finish().unwrap()).unwrap();
}

/// Scripted server side of a legacy-logon session.
fn serve_legacy_logon(listener: TcpListener) {
    let (mut peer, _) = listener.accept().unwrap();

    let mut selector = [0u8; 1];
    peer.read_exact(&mut selector).unwrap();
    assert_eq!(selector[0], 0x01, "chat selector expected");

    let (id, _) = read_frame(&mut peer);
    assert_eq!(id, ids::AUTH_INFO);
    send_frame(&mut peer, ids::AUTH_INFO, |b| {
        b.insert_u32(0) // login type: legacy only
            .insert_u32(0xAABB_CCDD)
            .insert_u32(0)
            .insert_i64(0)
            .insert_cstring("ver-IX86-1.mpq")
            .insert_cstring(FORMULA);
    });

    let (id, payload) = read_frame(&mut peer);
    assert_eq!(id, ids::AUTH_CHECK);
    assert!(payload.len() > 12, "auth check must carry a key proof");
    send_frame(&mut peer, ids::AUTH_CHECK, |b| {
        b.insert_u32(0).insert_cstring("");
    });

    let (id, payload) = read_frame(&mut peer);
    assert_eq!(id, ids::LEGACY_LOGON);
    // client token (4) + server token (4) + proof (20) + "tester\0"
    assert!(payload.ends_with(b"tester\0"));
    send_frame(&mut peer, ids::LEGACY_LOGON, |b| {
        b.insert_u32(0);
    });

    let (id, _) = read_frame(&mut peer);
    assert_eq!(id, ids::ENTER_CHAT);
    send_frame(&mut peer, ids::ENTER_CHAT, |b| {
        b.insert_cstring("tester")
            .insert_cstring("")
            .insert_cstring("tester");
    });

    // Post-chat follow-ups for a non-war product.
    let (id, _) = read_frame(&mut peer);
    assert_eq!(id, ids::CHANNEL_LIST);
    let (id, _) = read_frame(&mut peer);
    assert_eq!(id, ids::FRIENDS_LIST);

    // A frame nobody registered for must not stall the pipeline...
    send_frame(&mut peer, 0xEE, |b| {
        b.insert_u32(0xDEAD_BEEF);
    });
    // ...and the ping right behind it must still be echoed.
    send_frame(&mut peer, ids::PING, |b| {
        b.insert_u32(0x0BAD_CAFE);
    });
    let (id, payload) = read_frame(&mut peer);
    assert_eq!(id, ids::PING);
    assert_eq!(payload, 0x0BAD_CAFEu32.to_le_bytes());

    // Hang up; the client should surface a clean disconnect.
}

#[test]
fn legacy_logon_session_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || serve_legacy_logon(listener));

    let config = ChatwireConfig::default_with_overrides(|c| {
        c.transport.address = addr.to_string();
        c.client.username = "tester".into();
        c.client.password = "sekrit".into();
        c.client.product = "W2BN".into();
        c.client.logon_method = LogonMethod::Legacy;
        c.client.exe_version = 0x0203_0001;
        c.client.exe_info = "game.exe 01/01/2001 00:00:00 1048576".into();
        c.client.key_owner = "tester".into();
        c.client.keys = vec![ProductKey {
            product_value: 0x0F,
            public_value: 0x00C0FFEE,
            private_value: vec![0x11; 10],
        }];
    });

    let (events_tx, events_rx) = mpsc::channel();
    let session = Session::builder(config)
        .on_event(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .connect()
        .expect("session must connect");

    let mut entered = false;
    let mut disconnected = false;
    while let Ok(event) = events_rx.recv_timeout(Duration::from_secs(10)) {
        match event {
            SessionEvent::EnteredChat { unique_name } => {
                assert_eq!(unique_name, "tester");
                entered = true;
            }
            SessionEvent::Disconnected => {
                disconnected = true;
                break;
            }
            SessionEvent::Error { error } => panic!("unexpected session error: {error}"),
            _ => {}
        }
    }
    assert!(entered, "session never entered chat");
    assert!(disconnected, "session never reported the disconnect");

    server.join().unwrap();
    session.wait().unwrap();
}

#[test]
fn failed_client_check_closes_without_logon() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let mut selector = [0u8; 1];
        peer.read_exact(&mut selector).unwrap();

        let (id, _) = read_frame(&mut peer);
        assert_eq!(id, ids::AUTH_INFO);
        send_frame(&mut peer, ids::AUTH_INFO, |b| {
            b.insert_u32(0)
                .insert_u32(0x1111_2222)
                .insert_u32(0)
                .insert_i64(0)
                .insert_cstring("ver-IX86-1.mpq")
                .insert_cstring(FORMULA);
        });

        let (id, _) = read_frame(&mut peer);
        assert_eq!(id, ids::AUTH_CHECK);
        // Reject the client outright.
        send_frame(&mut peer, ids::AUTH_CHECK, |b| {
            b.insert_u32(0x65).insert_cstring("banned executable");
        });

        // The client closes; the next read must fail rather than yield a
        // logon frame.
        let mut probe = [0u8; 4];
        match peer.read(&mut probe) {
            Ok(0) | Err(_) => {}
            Ok(_) => panic!("client sent a frame after a failed auth check"),
        }
    });

    let config = ChatwireConfig::default_with_overrides(|c| {
        c.transport.address = addr.to_string();
        c.client.username = "tester".into();
        c.client.password = "sekrit".into();
        c.client.logon_method = LogonMethod::Legacy;
        c.client.keys = vec![ProductKey {
            product_value: 1,
            public_value: 2,
            private_value: vec![3; 10],
        }];
    });

    let (events_tx, events_rx) = mpsc::channel();
    let session = Session::builder(config)
        .on_event(move |event| {
            let _ = events_tx.send(event.clone());
        })
        .connect()
        .expect("session must connect");

    let mut saw_error = false;
    while let Ok(event) = events_rx.recv_timeout(Duration::from_secs(10)) {
        match event {
            SessionEvent::Error { error } => {
                assert!(error.contains("0x65"), "error should carry the status: {error}");
                saw_error = true;
            }
            SessionEvent::Disconnected => break,
            _ => {}
        }
    }
    assert!(saw_error, "client check failure was not surfaced");

    server.join().unwrap();
    session.wait().unwrap();
}
