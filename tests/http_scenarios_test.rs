//! End-to-end scenarios for the HTTP handler under the executor's retry
//! loop, driven against a local scripted TCP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use beamline_worker::executor::execute_with_retry;
use beamline_worker::flags::{ADVANCED_RETRY_ENV, COMPLETE_TIMEOUT_ENV};
use beamline_worker::{
    wire, BlockContext, ErrorCode, HandlerRegistry, Observability, StepRequest,
};

#[derive(Clone, Copy)]
enum ServerAction {
    Respond { status: u16, body: &'static str },
    Hang,
}

/// Serve one scripted action per connection; connections beyond the script
/// are answered 200 "ok".
async fn spawn_scripted_server(script: Vec<ServerAction>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut step = 0usize;
        let mut held_sockets = Vec::new();
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let action = script
                .get(step)
                .copied()
                .unwrap_or(ServerAction::Respond { status: 200, body: "ok" });
            step += 1;

            // Drain the request headers before answering.
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;

            match action {
                ServerAction::Respond { status, body } => {
                    let reason = match status {
                        200 => "OK",
                        404 => "Not Found",
                        500 => "Internal Server Error",
                        _ => "Status",
                    };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                ServerAction::Hang => {
                    // Keep the connection open without ever responding.
                    held_sockets.push(socket);
                }
            }
        }
    });

    addr
}

fn http_request(addr: SocketAddr, timeout_ms: i64, retry_count: i32) -> StepRequest {
    let mut req = StepRequest {
        step_type: "http.request".into(),
        timeout_ms,
        retry_count,
        ..Default::default()
    };
    req.inputs
        .insert("url".to_string(), format!("http://{addr}/"));
    req.inputs.insert("method".to_string(), "GET".to_string());
    req
}

fn ctx() -> BlockContext {
    BlockContext {
        tenant_id: "tenant-http".into(),
        trace_id: "trace-http".into(),
        run_id: "run-http".into(),
        flow_id: "flow-http".into(),
        step_id: "step-http".into(),
        ..Default::default()
    }
}

fn http_handler() -> Arc<dyn beamline_worker::BlockHandler> {
    HandlerRegistry::with_builtins().get("http.request").unwrap()
}

#[tokio::test]
#[serial]
async fn successful_request_completes_on_first_attempt() {
    std::env::remove_var(ADVANCED_RETRY_ENV);
    std::env::remove_var(COMPLETE_TIMEOUT_ENV);
    let addr = spawn_scripted_server(vec![ServerAction::Respond {
        status: 200,
        body: "hello",
    }])
    .await;

    let obs = Observability::new("http-test");
    let result =
        execute_with_retry(http_handler(), &http_request(addr, 5_000, 3), &ctx(), &obs).await;

    assert!(result.is_success());
    assert_eq!(result.error_code, ErrorCode::None);
    assert_eq!(result.outputs["status_code"], "200");
    assert_eq!(result.outputs["body"], "hello");
    assert_eq!(result.retries_used, 0);
    assert_eq!(result.metadata.tenant_id, "tenant-http");
    assert_eq!(result.metadata.run_id, "run-http");
    assert!(result.validate());

    let record = wire::to_exec_result(&result, "a1", "r1", "p1", "http.request");
    assert_eq!(record["status"], "success");
}

#[tokio::test]
#[serial]
async fn server_errors_are_retried_until_success() {
    std::env::set_var(ADVANCED_RETRY_ENV, "true");
    let addr = spawn_scripted_server(vec![
        ServerAction::Respond { status: 500, body: "boom" },
        ServerAction::Respond { status: 500, body: "boom" },
        ServerAction::Respond { status: 200, body: "recovered" },
    ])
    .await;

    let obs = Observability::new("http-test");
    let started = Instant::now();
    let result =
        execute_with_retry(http_handler(), &http_request(addr, 30_000, 3), &ctx(), &obs).await;

    assert!(result.is_success(), "{}", result.error_message);
    assert_eq!(result.outputs["body"], "recovered");
    assert_eq!(result.retries_used, 2);
    // Exponential backoff slept 100ms then 200ms between the attempts.
    assert!(started.elapsed() >= Duration::from_millis(300));
    std::env::remove_var(ADVANCED_RETRY_ENV);
}

#[tokio::test]
#[serial]
async fn client_errors_are_not_retried() {
    std::env::set_var(ADVANCED_RETRY_ENV, "true");
    let addr = spawn_scripted_server(vec![
        ServerAction::Respond { status: 404, body: "missing" },
        ServerAction::Respond { status: 200, body: "never reached" },
    ])
    .await;

    let obs = Observability::new("http-test");
    let started = Instant::now();
    let result =
        execute_with_retry(http_handler(), &http_request(addr, 30_000, 3), &ctx(), &obs).await;

    assert!(result.is_error());
    assert_eq!(result.error_code, ErrorCode::HttpError);
    assert_eq!(result.outputs["status_code"], "404");
    assert_eq!(result.retries_used, 0, "4xx must surface without retries");
    // One request, no backoff sleeps.
    assert!(started.elapsed() < Duration::from_millis(5_000));
    std::env::remove_var(ADVANCED_RETRY_ENV);
}

#[tokio::test]
#[serial]
async fn hanging_server_exhausts_the_total_budget() {
    std::env::set_var(ADVANCED_RETRY_ENV, "true");
    std::env::remove_var(COMPLETE_TIMEOUT_ENV);
    let addr = spawn_scripted_server(vec![
        ServerAction::Hang,
        ServerAction::Hang,
        ServerAction::Hang,
    ])
    .await;

    let obs = Observability::new("http-test");
    let started = Instant::now();
    let result =
        execute_with_retry(http_handler(), &http_request(addr, 300, 10), &ctx(), &obs).await;
    let elapsed = started.elapsed();

    assert!(result.is_timeout(), "got {:?}", result.status);
    assert_eq!(result.error_code, ErrorCode::CancelledByTimeout);
    assert!(result.error_message.contains("retry budget exhausted"));
    // The budget is 300ms; allow generous scheduling tolerance but prove
    // no extra attempt ran past the deadline.
    assert!(elapsed < Duration::from_millis(1_500), "took {elapsed:?}");
    assert!(result.validate());
    std::env::remove_var(ADVANCED_RETRY_ENV);
}
