// Integration tests for tether-server
//
// These tests start a real server on a loopback port with a few test
// services, then connect a tether client to make RPC calls.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_client::{ClientConfig, ServiceClient};
use tether_common::{
    Codec, CodecConfig, FrameCodec, InvokeResult, InvokeSpec, MethodSignature, StatusCode,
    TetherError, TypeRef, TypeRegistry, TypeSpec, Value,
};
use tether_server::registry::{arg, InvocationError, ServiceBinding};
use tether_server::{ServerBuilder, ServerConfig, ServerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

// ============================================================================
// Test Helpers
// ============================================================================

fn doubles(returns: TypeSpec, params: usize) -> MethodSignature {
    (0..params).fold(MethodSignature::new(returns), |signature, _| {
        signature.param(TypeSpec::boxed(TypeRef::Double))
    })
}

fn add_signature() -> MethodSignature {
    doubles(TypeSpec::boxed(TypeRef::Double), 2)
}

fn point_signature() -> MethodSignature {
    MethodSignature::new(TypeSpec::boxed(TypeRef::registered("test.Point")))
        .param(TypeSpec::boxed(TypeRef::registered("test.Point")))
}

fn server_codec() -> CodecConfig {
    let registry = TypeRegistry::builder()
        .register_object(1, "test.Point", &["x", "y"])
        .unwrap()
        .build();
    CodecConfig::default().with_registry(registry)
}

/// Knows one extra class the server has never registered.
fn client_codec() -> CodecConfig {
    let registry = TypeRegistry::builder()
        .register_object(1, "test.Point", &["x", "y"])
        .unwrap()
        .register_object(2, "test.Secret", &["value"])
        .unwrap()
        .build();
    CodecConfig::default().with_registry(registry)
}

fn double_service() -> ServiceBinding {
    ServiceBinding::new("DoubleService")
        .method("add", add_signature(), |args: Vec<Value>| async move {
            let a: f64 = arg(&args, 0)?;
            let b: f64 = arg(&args, 1)?;
            Ok(Value::Double(a + b))
        })
        .method("div", add_signature(), |args: Vec<Value>| async move {
            let a: f64 = arg(&args, 0)?;
            let b: f64 = arg(&args, 1)?;
            if b == 0.0 {
                return Err(InvocationError::failed("division by zero"));
            }
            Ok(Value::Double(a / b))
        })
        .method(
            "slow",
            doubles(TypeSpec::boxed(TypeRef::Double), 1),
            |args: Vec<Value>| async move {
                let millis: f64 = arg(&args, 0)?;
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
                Ok(Value::Double(millis))
            },
        )
        .method(
            "label",
            doubles(TypeSpec::boxed(TypeRef::Double), 0),
            |_args: Vec<Value>| async move { Ok(Value::from("not a double")) },
        )
}

fn point_service() -> ServiceBinding {
    ServiceBinding::new("PointService").method("mirror", point_signature(), |args: Vec<Value>| async move {
        match args.into_iter().next() {
            Some(Value::Object(point)) => Ok(Value::object(
                "test.Point",
                vec![point.fields[1].clone(), point.fields[0].clone()],
            )),
            _ => Err(InvocationError::InvalidArgument("expected a point".into())),
        }
    })
}

async fn start_server(config: ServerConfig) -> ServerHandle {
    ServerBuilder::new(config, server_codec())
        .add_binding(double_service())
        .add_binding(point_service())
        .build()
        .unwrap()
        .bind("127.0.0.1:0")
        .await
        .unwrap()
        .spawn()
}

fn connect(server: &ServerHandle, config: ClientConfig) -> ServiceClient {
    ServiceClient::new(server.local_addr().to_string(), config, client_codec()).unwrap()
}

/// A framed socket speaking the wire protocol directly, bypassing the
/// client session.
async fn raw_connection(server: &ServerHandle) -> Framed<TcpStream, FrameCodec> {
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    Framed::new(stream, FrameCodec::new())
}

async fn send_spec(connection: &mut Framed<TcpStream, FrameCodec>, codec: &Codec, spec: &InvokeSpec) {
    connection.send(codec.encode_spec(spec).unwrap()).await.unwrap();
}

async fn next_result(connection: &mut Framed<TcpStream, FrameCodec>, codec: &Codec) -> InvokeResult {
    let frame = tokio::time::timeout(Duration::from_secs(5), connection.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    codec.decode_result(&frame).unwrap()
}

async fn wait_for_connections(server: &ServerHandle, expected: usize) {
    for _ in 0..100 {
        if server.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connection_count(), expected);
}

async fn add(client: &ServiceClient, a: f64, b: f64) -> tether_common::Result<f64> {
    client
        .service("DoubleService")
        .invoke("add", add_signature(), vec![Value::Double(a), Value::Double(b)])
        .await
}

// ============================================================================
// Successful Calls
// ============================================================================

#[tokio::test]
async fn test_add_returns_sum() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    assert_eq!(add(&client, 1.0, 8.0).await.unwrap(), 9.0);

    let spec = InvokeSpec::new(
        "DoubleService",
        "add",
        add_signature(),
        vec![Value::Double(1.0), Value::Double(8.0)],
    );
    let result = client.call(&spec).await.unwrap();
    assert_eq!(result.request_id, spec.request_id);
    assert_eq!(result.status, StatusCode::Ok);
    assert_eq!(result.payload, Value::Double(9.0));
}

#[tokio::test]
async fn test_registered_object_round_trip() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    let point = Value::object("test.Point", vec![Value::Int(3), Value::Int(-4)]);
    let mirrored: Value = client
        .service("PointService")
        .invoke("mirror", point_signature(), vec![point])
        .await
        .unwrap();

    assert_eq!(
        mirrored,
        Value::object("test.Point", vec![Value::Int(-4), Value::Int(3)])
    );
}

#[tokio::test]
async fn test_concurrent_calls_share_one_connection() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    let calls = (0..20).map(|i| {
        let client = client.clone();
        async move { add(&client, i as f64, 1.0).await }
    });
    let results = futures::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), i as f64 + 1.0);
    }
    assert_eq!(server.connection_count(), 1);
}

// ============================================================================
// Business Errors
// ============================================================================

#[tokio::test]
async fn test_arity_mismatch_is_parameter_error_and_connection_stays_open() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());
    let session = client.connector().session().await.unwrap();

    let spec = InvokeSpec::new(
        "DoubleService",
        "add",
        doubles(TypeSpec::boxed(TypeRef::Double), 3),
        vec![Value::Double(1.0), Value::Double(8.0)],
    );
    let result = client.call(&spec).await.unwrap();
    assert_eq!(result.status, StatusCode::ParameterError);

    assert_eq!(add(&client, 2.0, 3.0).await.unwrap(), 5.0);
    let same = client.connector().session().await.unwrap();
    assert!(Arc::ptr_eq(&session, &same));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_unknown_method_is_lookup_error() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    let err = client
        .service("DoubleService")
        .invoke::<f64>("sub", add_signature(), vec![Value::Double(1.0), Value::Double(2.0)])
        .await
        .unwrap_err();

    match err {
        TetherError::Remote { status, message } => {
            assert_eq!(status, StatusCode::LookupError);
            assert!(message.contains("Method not found"));
        }
        other => panic!("expected lookup error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_error_is_invocation_error() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    let err = client
        .service("DoubleService")
        .invoke::<f64>("div", add_signature(), vec![Value::Double(1.0), Value::Double(0.0)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TetherError::Remote { status: StatusCode::InvocationError, ref message } if message == "division by zero"
    ));
}

#[tokio::test]
async fn test_wrong_return_type_is_invocation_error() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());

    let err = client
        .service("DoubleService")
        .invoke::<f64>("label", doubles(TypeSpec::boxed(TypeRef::Double), 0), vec![])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TetherError::Remote {
            status: StatusCode::InvocationError,
            ..
        }
    ));
}

#[tokio::test]
async fn test_duplicate_in_flight_request_id_is_parameter_error() {
    let server = start_server(ServerConfig::default()).await;
    let codec = Codec::new(server_codec());
    let mut connection = raw_connection(&server).await;

    let slow = InvokeSpec::new(
        "DoubleService",
        "slow",
        doubles(TypeSpec::boxed(TypeRef::Double), 1),
        vec![Value::Double(300.0)],
    )
    .with_request_id(42);

    send_spec(&mut connection, &codec, &slow).await;
    send_spec(&mut connection, &codec, &slow).await;

    // The duplicate is rejected at once; the original still completes.
    let rejected = next_result(&mut connection, &codec).await;
    assert_eq!(rejected.request_id, 42);
    assert_eq!(rejected.status, StatusCode::ParameterError);
    assert!(rejected
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("Duplicated requestId")));

    let completed = next_result(&mut connection, &codec).await;
    assert_eq!(completed.request_id, 42);
    assert_eq!(completed.status, StatusCode::Ok);
    assert_eq!(completed.payload, Value::Double(300.0));

    // Once answered, the id may be used again.
    send_spec(&mut connection, &codec, &slow).await;
    let reused = next_result(&mut connection, &codec).await;
    assert_eq!(reused.request_id, 42);
    assert_eq!(reused.status, StatusCode::Ok);
    assert_eq!(reused.payload, Value::Double(300.0));
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_slow_handler_times_out_locally() {
    let server = start_server(ServerConfig::default()).await;
    let config = ClientConfig::default().with_call_timeout(Duration::from_millis(200));
    let client = connect(&server, config);

    let started = std::time::Instant::now();
    let err = client
        .service("DoubleService")
        .invoke::<f64>(
            "slow",
            doubles(TypeSpec::boxed(TypeRef::Double), 1),
            vec![Value::Double(1000.0)],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TetherError::Timeout(200)));
    assert!(started.elapsed() < Duration::from_millis(1000));

    // The late response arrives and is dropped; the connection keeps working.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(add(&client, 1.0, 1.0).await.unwrap(), 2.0);
    assert_eq!(server.connection_count(), 1);
}

// ============================================================================
// Fatal Connection Errors
// ============================================================================

#[tokio::test]
async fn test_unregistered_class_fails_in_flight_and_closes_connection() {
    let server = start_server(ServerConfig::default()).await;
    let client = connect(&server, ClientConfig::default());
    let session = client.connector().session().await.unwrap();

    let slow = InvokeSpec::new(
        "DoubleService",
        "slow",
        doubles(TypeSpec::boxed(TypeRef::Double), 1),
        vec![Value::Double(2000.0)],
    );
    let secret_signature = MethodSignature::new(TypeSpec::primitive(TypeRef::Void))
        .param(TypeSpec::boxed(TypeRef::registered("test.Secret")));
    let secret = InvokeSpec::new(
        "SecretService",
        "store",
        secret_signature,
        vec![Value::object("test.Secret", vec![Value::from("hunter2")])],
    );

    let in_flight = session.call(&slow);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let poisoned = session.call(&secret);

    let result = in_flight.await.unwrap();
    assert_eq!(result.request_id, slow.request_id);
    assert_eq!(result.status, StatusCode::ProtocolError);

    assert!(matches!(poisoned.await, Err(TetherError::ConnectionClosed(_))));
    assert!(session.is_closed());

    // A new connection works normally.
    assert_eq!(add(&client, 1.0, 8.0).await.unwrap(), 9.0);
    let fresh = client.connector().session().await.unwrap();
    assert!(!Arc::ptr_eq(&session, &fresh));
}

#[tokio::test]
async fn test_bad_magic_with_nothing_in_flight_closes_without_writing() {
    let server = start_server(ServerConfig::default()).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    wait_for_connections(&server, 1).await;

    stream.write_all(&[0xde, 0xad, 0, 0, 0, 1, 0]).await.unwrap();

    let mut received = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
    assert!(received.is_empty());

    wait_for_connections(&server, 0).await;
}

// ============================================================================
// Idle Reaping
// ============================================================================

#[tokio::test]
async fn test_idle_connection_is_reaped() {
    let config = ServerConfig::default()
        .with_keep_alive(Duration::from_millis(300))
        .with_scan_interval(Duration::from_millis(50));
    let server = start_server(config).await;
    let client = connect(&server, ClientConfig::default());

    assert_eq!(add(&client, 1.0, 1.0).await.unwrap(), 2.0);
    let session = client.connector().session().await.unwrap();
    assert_eq!(server.connection_count(), 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(session.is_closed());
    assert_eq!(server.connection_count(), 0);

    // The connector reconnects on the next call.
    assert_eq!(add(&client, 2.0, 2.0).await.unwrap(), 4.0);
}

#[tokio::test]
async fn test_connection_with_request_in_flight_is_not_reaped() {
    let config = ServerConfig::default()
        .with_keep_alive(Duration::from_millis(200))
        .with_scan_interval(Duration::from_millis(50));
    let server = start_server(config).await;
    let client = connect(&server, ClientConfig::default());

    let waited: f64 = client
        .service("DoubleService")
        .invoke(
            "slow",
            doubles(TypeSpec::boxed(TypeRef::Double), 1),
            vec![Value::Double(700.0)],
        )
        .await
        .unwrap();
    assert_eq!(waited, 700.0);
}

#[tokio::test]
async fn test_zero_keep_alive_disables_reaping() {
    let config = ServerConfig::default()
        .with_keep_alive(Duration::ZERO)
        .with_scan_interval(Duration::from_millis(20));
    let server = start_server(config).await;
    let client = connect(&server, ClientConfig::default());

    assert_eq!(add(&client, 1.0, 1.0).await.unwrap(), 2.0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = start_server(ServerConfig::default()).await;
    let addr = server.local_addr();
    let client = connect(&server, ClientConfig::default());

    assert_eq!(add(&client, 1.0, 1.0).await.unwrap(), 2.0);
    let session = client.connector().session().await.unwrap();

    server.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_closed());

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
