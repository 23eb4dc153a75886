//! Client Session Integration Tests
//!
//! These tests run a session against stub servers on loopback sockets and
//! verify:
//! - Request/response correlation, including out-of-order responses
//! - Duplicate request ids failing the earlier call
//! - Local timeouts and dropping of late responses
//! - Failing pending calls on disconnect, close and fatal framing errors

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tether_client::{ClientConfig, ClientSession, TimeoutScheduler};
use tether_common::{
    Codec, FrameCodec, InvokeResult, InvokeSpec, MethodSignature, StatusCode, TetherError,
    TypeRef, TypeSpec, Value,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

type StubConnection = Framed<TcpStream, FrameCodec>;

/// Serves exactly one connection with `handler`.
async fn stub_server<F, Fut>(handler: F) -> SocketAddr
where
    F: FnOnce(StubConnection) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handler(Framed::new(stream, FrameCodec::new())).await;
    });

    addr
}

async fn next_spec(conn: &mut StubConnection) -> Option<InvokeSpec> {
    let frame = conn.next().await?.ok()?;
    Codec::default().decode_spec(&frame).ok()
}

async fn reply(conn: &mut StubConnection, result: InvokeResult) {
    let body = Codec::default().encode_result(&result).unwrap();
    conn.send(body).await.unwrap();
}

fn add_spec(a: f64, b: f64) -> InvokeSpec {
    let signature = MethodSignature::new(TypeSpec::boxed(TypeRef::Double))
        .param(TypeSpec::boxed(TypeRef::Double))
        .param(TypeSpec::boxed(TypeRef::Double));
    InvokeSpec::new(
        "DoubleService",
        "add",
        signature,
        vec![Value::Double(a), Value::Double(b)],
    )
}

fn sum_of(spec: &InvokeSpec) -> Value {
    match (&spec.arguments[0], &spec.arguments[1]) {
        (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
        _ => Value::Null,
    }
}

async fn open(addr: SocketAddr, config: ClientConfig, scheduler: &TimeoutScheduler) -> ClientSession {
    ClientSession::connect(addr, config, Codec::default(), scheduler.handle())
        .await
        .unwrap()
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_call_round_trip() {
    let addr = stub_server(|mut conn| async move {
        while let Some(spec) = next_spec(&mut conn).await {
            let payload = sum_of(&spec);
            reply(&mut conn, InvokeResult::ok(spec.request_id, payload)).await;
        }
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;
    assert_eq!(session.peer_addr(), addr);

    let result = session.call(&add_spec(1.0, 8.0)).await.unwrap();
    assert_eq!(result.status, StatusCode::Ok);
    assert_eq!(result.payload, Value::Double(9.0));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let addr = stub_server(|mut conn| async move {
        let first = next_spec(&mut conn).await.unwrap();
        let second = next_spec(&mut conn).await.unwrap();
        reply(&mut conn, InvokeResult::ok(second.request_id, sum_of(&second))).await;
        reply(&mut conn, InvokeResult::ok(first.request_id, sum_of(&first))).await;
        let _ = conn.next().await;
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let first = session.call(&add_spec(1.0, 1.0));
    let second = session.call(&add_spec(2.0, 2.0));
    assert_eq!(session.pending_count(), 2);

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().payload, Value::Double(2.0));
    assert_eq!(second.unwrap().payload, Value::Double(4.0));
}

#[tokio::test]
async fn test_error_status_is_carried_in_result() {
    let addr = stub_server(|mut conn| async move {
        let spec = next_spec(&mut conn).await.unwrap();
        let result = InvokeResult::error(spec.request_id, StatusCode::LookupError, "Method not found");
        reply(&mut conn, result).await;
        let _ = conn.next().await;
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let result = session.call(&add_spec(1.0, 2.0)).await.unwrap();
    assert_eq!(result.status, StatusCode::LookupError);
    assert!(matches!(
        result.into_payload(),
        Err(TetherError::Remote { status: StatusCode::LookupError, .. })
    ));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_duplicate_request_id_fails_earlier_call() {
    let addr = stub_server(|mut conn| async move {
        while conn.next().await.is_some() {}
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let spec = add_spec(1.0, 2.0).with_request_id(u64::MAX - 7);
    let earlier = session.call(&spec);
    let _later = session.call(&spec);

    match earlier.await {
        Err(TetherError::DuplicateRequestId(id)) => assert_eq!(id, u64::MAX - 7),
        other => panic!("expected duplicate id error, got {:?}", other),
    }
    assert_eq!(session.pending_count(), 1);
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_timeout_then_late_response_is_dropped() {
    let addr = stub_server(|mut conn| async move {
        let slow = next_spec(&mut conn).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        reply(&mut conn, InvokeResult::ok(slow.request_id, sum_of(&slow))).await;

        while let Some(spec) = next_spec(&mut conn).await {
            reply(&mut conn, InvokeResult::ok(spec.request_id, sum_of(&spec))).await;
        }
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let config = ClientConfig::default().with_call_timeout(Duration::from_millis(100));
    let session = open(addr, config, &scheduler).await;

    let started = std::time::Instant::now();
    let err = session.call(&add_spec(1.0, 2.0)).await.unwrap_err();
    assert!(matches!(err, TetherError::Timeout(100)));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(session.pending_count(), 0);

    // Let the late response arrive; it must not disturb the session.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!session.is_closed());

    let result = session.call(&add_spec(3.0, 4.0)).await.unwrap();
    assert_eq!(result.payload, Value::Double(7.0));
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_disconnect_fails_pending_calls() {
    let addr = stub_server(|mut conn| async move {
        let _ = next_spec(&mut conn).await;
        let _ = next_spec(&mut conn).await;
        // Dropping the connection closes the socket.
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let first = session.call(&add_spec(1.0, 2.0));
    let second = session.call(&add_spec(3.0, 4.0));

    for outcome in [first.await, second.await] {
        assert!(matches!(outcome, Err(TetherError::ConnectionClosed(_))), "{:?}", outcome);
    }
    assert!(session.is_closed());
    assert_eq!(session.pending_count(), 0);

    let after = session.call(&add_spec(5.0, 6.0)).await;
    assert!(matches!(after, Err(TetherError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let addr = stub_server(|mut conn| async move {
        while conn.next().await.is_some() {}
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let pending = session.call(&add_spec(1.0, 2.0));
    session.close().unwrap();

    assert!(matches!(pending.await, Err(TetherError::ConnectionClosed(_))));
    assert!(matches!(
        session.close(),
        Err(TetherError::AlreadyClosed("ClientSession"))
    ));
}

#[tokio::test]
async fn test_bad_magic_fails_pending_with_protocol_error() {
    let addr = stub_server(|conn| async move {
        let mut stream = conn.into_inner();
        let mut garbage = BytesMut::new();
        garbage.put_u16(0xBEEF);
        garbage.put_u32(4);
        garbage.put_slice(b"oops");
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(&garbage).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let session = open(addr, ClientConfig::default(), &scheduler).await;

    let outcome = session.call(&add_spec(1.0, 2.0)).await;
    assert!(matches!(outcome, Err(TetherError::Protocol(_))), "{:?}", outcome);
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_oversized_request_fails_locally() {
    let addr = stub_server(|mut conn| async move {
        while let Some(spec) = next_spec(&mut conn).await {
            reply(&mut conn, InvokeResult::ok(spec.request_id, Value::Null)).await;
        }
    })
    .await;

    let scheduler = TimeoutScheduler::spawn();
    let config = ClientConfig::default().with_max_frame_size(64);
    let session = open(addr, config, &scheduler).await;

    let signature = MethodSignature::new(TypeSpec::primitive(TypeRef::Void))
        .param(TypeSpec::boxed(TypeRef::Bytes));
    let spec = InvokeSpec::new("BlobService", "store", signature, vec![Value::Bytes(vec![0; 256])]);

    let outcome = session.call(&spec).await;
    assert!(matches!(outcome, Err(TetherError::FrameTooLarge { max: 64, .. })));
    assert!(!session.is_closed());
    assert_eq!(session.pending_count(), 0);
}
