#![cfg(target_os = "linux")]

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ggipc_client::{
    ClientConfig, ClientError, Connection, HandlerError, IpcClient, RequestEnvelope, StreamId,
    SubscriptionCallback,
};
use ggipc_frame::{
    CommonHeaders, FrameConfig, FrameError, FrameReader, FrameWriter, MessageFlags, MessageKind,
};
use ggipc_transport::IpcStream;
use serde_json::{json, Value};

struct FakeServer {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
}

impl FakeServer {
    fn next_request(&mut self) -> (StreamId, RequestEnvelope) {
        let frame = self.reader.read_frame().unwrap();
        assert_eq!(frame.headers.kind, MessageKind::ApplicationMessage);
        let request = serde_json::from_slice(&frame.body).unwrap();
        (frame.headers.stream_id, request)
    }

    fn send(&mut self, stream_id: StreamId, kind: MessageKind, flags: MessageFlags, body: &[u8]) {
        let headers = CommonHeaders {
            stream_id,
            kind,
            flags,
        };
        self.writer.send(&headers, body).unwrap();
    }

    fn reply(&mut self, stream_id: StreamId, body: Value) {
        let body = serde_json::to_vec(&body).unwrap();
        self.send(
            stream_id,
            MessageKind::ApplicationMessage,
            MessageFlags::NONE,
            &body,
        );
    }

    fn reply_error(&mut self, stream_id: StreamId, code: &str, message: &str) {
        let body = serde_json::to_vec(&json!({ "_errorCode": code, "_message": message })).unwrap();
        self.send(
            stream_id,
            MessageKind::ApplicationError,
            MessageFlags::NONE,
            &body,
        );
    }
}

fn setup(config: ClientConfig) -> (IpcClient, Connection, FakeServer) {
    let (client_end, server_end) = IpcStream::pair().unwrap();
    let client = IpcClient::new(config).unwrap();
    let conn = client.attach(client_end).unwrap();

    let frame_config = FrameConfig {
        read_timeout: Some(Duration::from_secs(5)),
        ..FrameConfig::default()
    };
    let server = FakeServer {
        reader: FrameReader::with_config_ipc(server_end.try_clone().unwrap(), frame_config.clone())
            .unwrap(),
        writer: FrameWriter::with_config_ipc(server_end, frame_config).unwrap(),
    };
    (client, conn, server)
}

#[test]
fn call_returns_reply() {
    let (client, conn, mut server) = setup(ClientConfig::default());

    let srv = thread::spawn(move || {
        let (stream_id, request) = server.next_request();
        assert_eq!(request.operation, "test#Echo");
        server.reply(stream_id, json!({ "echo": request.payload }));
        server
    });

    let reply = conn.call("test#Echo", json!({ "n": 7 })).unwrap();
    assert_eq!(reply, json!({ "echo": { "n": 7 } }));
    assert_eq!(client.registry().active_count(), 0);
    srv.join().unwrap();
}

#[test]
fn call_surfaces_remote_error() {
    let (client, conn, mut server) = setup(ClientConfig::default());

    let srv = thread::spawn(move || {
        let (stream_id, _) = server.next_request();
        server.reply_error(stream_id, "UnauthorizedError", "not allowed");
        server
    });

    let err = conn.call("test#Secret", Value::Null).unwrap_err();
    assert!(err.is_unauthorized());
    match err {
        ClientError::Remote { message, .. } => assert_eq!(message, "not allowed"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.registry().active_count(), 0);
    srv.join().unwrap();
}

#[test]
fn timed_out_call_releases_slot_and_late_reply_is_dropped() {
    let (client, conn, mut server) = setup(ClientConfig::default());
    let (late_tx, late_rx) = mpsc::channel::<()>();

    let srv = thread::spawn(move || {
        let (stale_id, _) = server.next_request();
        late_rx.recv().unwrap();
        // Late reply for a released stream, then service the next call.
        server.reply(stale_id, json!("late"));
        let (stream_id, _) = server.next_request();
        server.reply(stream_id, json!("fresh"));
        server
    });

    let err = conn
        .call_with_timeout("test#Slow", Value::Null, Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(client.registry().active_count(), 0);

    late_tx.send(()).unwrap();
    let reply = conn.call("test#Fast", Value::Null).unwrap();
    assert_eq!(reply, json!("fresh"));
    assert!(client.dispatcher().is_running());
    srv.join().unwrap();
}

#[test]
fn concurrent_calls_are_routed_by_stream_id() {
    let (client, conn, mut server) = setup(ClientConfig::default());
    const CALLERS: usize = 8;

    let srv = thread::spawn(move || {
        let mut requests: Vec<_> = (0..CALLERS).map(|_| server.next_request()).collect();
        // Answer in reverse arrival order.
        requests.reverse();
        for (stream_id, request) in requests {
            server.reply(stream_id, request.payload);
        }
        server
    });

    thread::scope(|scope| {
        for i in 0..CALLERS {
            let conn = &conn;
            scope.spawn(move || {
                let reply = conn.call("test#Echo", json!(i)).unwrap();
                assert_eq!(reply, json!(i));
            });
        }
    });

    assert_eq!(client.registry().active_count(), 0);
    srv.join().unwrap();
}

#[test]
fn exhausted_registry_rejects_call() {
    let (_client, conn, mut server) = setup(ClientConfig::default().with_max_streams(2));
    let (events_tx, _events_rx) = mpsc::channel();

    let srv = thread::spawn(move || {
        let (stream_id, _) = server.next_request();
        server.reply(stream_id, json!({}));
        server
    });
    let subscription = conn
        .subscribe("test#Watch", Value::Null, Forward(events_tx))
        .unwrap();

    let err = conn.call("test#Echo", Value::Null).unwrap_err();
    assert!(matches!(err, ClientError::StreamsExhausted { capacity: 2 }));

    drop(subscription);
    srv.join().unwrap();
}

enum Event {
    Data(Value),
    Closed,
}

struct Forward(mpsc::Sender<Event>);

impl SubscriptionCallback for Forward {
    fn on_event(&self, event: Value) -> Result<(), HandlerError> {
        self.0
            .send(Event::Data(event))
            .map_err(|err| HandlerError::Callback(err.to_string()))
    }

    fn on_close(&self) {
        let _ = self.0.send(Event::Closed);
    }
}

fn recv(rx: &mpsc::Receiver<Event>) -> Event {
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

#[test]
fn subscription_delivers_events_until_terminated() {
    let (client, conn, mut server) = setup(ClientConfig::default());
    let (events_tx, events_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let srv = thread::spawn(move || {
        let (stream_id, request) = server.next_request();
        assert_eq!(request.operation, "test#Watch");
        server.reply(stream_id, json!({}));
        go_rx.recv().unwrap();
        for n in 1..=3 {
            server.reply(stream_id, json!({ "n": n }));
        }
        server.send(
            stream_id,
            MessageKind::ApplicationMessage,
            MessageFlags::TERMINATE_STREAM,
            b"",
        );
        server
    });

    let subscription = conn
        .subscribe("test#Watch", json!({ "topic": "a" }), Forward(events_tx))
        .unwrap();
    assert!(subscription.is_active());
    go_tx.send(()).unwrap();

    for n in 1..=3 {
        match recv(&events_rx) {
            Event::Data(event) => assert_eq!(event, json!({ "n": n })),
            Event::Closed => panic!("closed before event {n}"),
        }
    }
    assert!(matches!(recv(&events_rx), Event::Closed));
    assert!(!subscription.is_active());
    assert_eq!(client.registry().active_count(), 0);

    // Already released by the remote side.
    assert!(!subscription.unsubscribe());
    srv.join().unwrap();
}

#[test]
fn rejected_subscription_returns_remote_error() {
    let (client, conn, mut server) = setup(ClientConfig::default());
    let (events_tx, events_rx) = mpsc::channel();

    let srv = thread::spawn(move || {
        let (stream_id, _) = server.next_request();
        server.reply_error(stream_id, "ResourceNotFoundError", "no such topic");
        server
    });

    let err = conn
        .subscribe("test#Watch", Value::Null, Forward(events_tx))
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote { ref code, .. } if code == "ResourceNotFoundError"));
    assert_eq!(client.registry().active_count(), 0);
    assert!(events_rx.try_recv().is_err());
    srv.join().unwrap();
}

#[test]
fn unsubscribe_stops_delivery() {
    let (client, conn, mut server) = setup(ClientConfig::default());
    let (events_tx, events_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let srv = thread::spawn(move || {
        let (sub_id, _) = server.next_request();
        server.reply(sub_id, json!({}));
        go_rx.recv().unwrap();
        server.reply(sub_id, json!({ "after": "unsubscribe" }));
        let (call_id, _) = server.next_request();
        server.reply(call_id, json!("done"));
        server
    });

    let subscription = conn
        .subscribe("test#Watch", Value::Null, Forward(events_tx))
        .unwrap();
    assert!(subscription.unsubscribe());
    assert_eq!(client.registry().active_count(), 0);
    go_tx.send(()).unwrap();

    // The call reply is behind the stray event on the same connection, so
    // once it arrives the event has been dropped.
    assert_eq!(conn.call("test#Echo", Value::Null).unwrap(), json!("done"));
    assert!(events_rx.try_recv().is_err());
    srv.join().unwrap();
}

#[test]
fn shutdown_stops_receive_thread() {
    let (mut client, _conn, _server) = setup(ClientConfig::default());
    assert!(client.dispatcher().is_running());
    client.shutdown();
    assert!(!client.dispatcher().is_running());
    assert!(client.dispatcher().try_fatal().is_none());
}

#[test]
fn call_after_shutdown_fails_without_sending() {
    let (mut client, conn, mut server) = setup(ClientConfig::default());
    client.shutdown();
    assert!(!conn.is_receiving());

    let started = Instant::now();
    let err = conn
        .call_with_timeout("test#Echo", Value::Null, Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, ClientError::DispatcherStopped));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.registry().active_count(), 0);

    // The connection was closed and no request reached the server.
    assert!(matches!(
        server.reader.read_frame(),
        Err(FrameError::ConnectionClosed)
    ));
}

#[test]
fn shutdown_releases_blocked_callers() {
    let (mut client, conn, mut server) = setup(ClientConfig::default());
    let (events_tx, events_rx) = mpsc::channel();

    let srv = thread::spawn(move || {
        let (sub_id, _) = server.next_request();
        server.reply(sub_id, json!({}));
        server
    });
    let subscription = conn
        .subscribe("test#Watch", Value::Null, Forward(events_tx))
        .unwrap();
    let mut server = srv.join().unwrap();

    thread::scope(|scope| {
        let caller = scope.spawn(|| {
            let started = Instant::now();
            let result = conn.call_with_timeout("test#Slow", Value::Null, Duration::from_secs(10));
            (result, started.elapsed())
        });

        // Wait until the call is in flight, then stop the receive thread.
        let (_, request) = server.next_request();
        assert_eq!(request.operation, "test#Slow");
        client.shutdown();

        let (result, elapsed) = caller.join().unwrap();
        assert!(matches!(result, Err(ClientError::DispatcherStopped)));
        assert!(elapsed < Duration::from_secs(5));
    });

    assert!(matches!(recv(&events_rx), Event::Closed));
    assert!(!subscription.is_active());
    assert_eq!(client.registry().active_count(), 0);
    assert!(matches!(
        server.reader.read_frame(),
        Err(FrameError::ConnectionClosed)
    ));
}

