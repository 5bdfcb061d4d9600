//! End-to-end tests driving the proxy with a real HTTP client.
//!
//! Each test binds the proxy to an ephemeral loopback port and points a
//! `reqwest` client at it with `Proxy::all`.

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiretap_proxy::snapshot::Snapshot;
use wiretap_proxy::{ArchiveStore, CertAuthority, Server, SnapshotStore};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

static CA: Lazy<Arc<CertAuthority>> =
    Lazy::new(|| Arc::new(CertAuthority::generate().unwrap()));

/// Plain HTTP origin answering `echo: <path>`.
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = format!("echo: {}", req.uri().path());
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

fn proxied_client(server: &Server) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(server.url()).unwrap())
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}

async fn replay_server(dir: &Path) -> Server {
    let mut server = Server::new(Arc::clone(&CA), Arc::new(ArchiveStore::new(dir))).with_test_addr();
    server.load_snapshots(dir).unwrap();
    server.start_in_replay_mode().await.unwrap();
    server
}

#[tokio::test]
async fn test_capture_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    let origin = start_echo_server().await;
    let url = format!("http://{origin}/hello");

    let mut capture =
        Server::new(Arc::clone(&CA), Arc::new(ArchiveStore::new(dir.path()))).with_test_addr();
    let mut written = capture.topic().subscribe();
    capture.start_in_capture_mode().await.unwrap();

    let res = proxied_client(&capture).get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "echo: /hello");

    let snapshot = tokio::time::timeout(TEST_TIMEOUT, written.next())
        .await
        .unwrap()
        .unwrap();
    assert!(!snapshot.secure);
    let archive = dir.path().join(format!("{}.txtar", snapshot.id));
    assert!(archive.is_file(), "missing {}", archive.display());

    let stored = ArchiveStore::new(dir.path())
        .read(&snapshot.reference())
        .unwrap();
    assert_eq!(stored.request().unwrap().method, "GET");
    assert_eq!(stored.response().unwrap().status_code, 200);

    capture.shutdown();
    capture.serve().await.unwrap();

    let replay = replay_server(dir.path()).await;
    let client = proxied_client(&replay);

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-wiretap-cache-hit"], "true");
    assert_eq!(res.text().await.unwrap(), "echo: /hello");

    let res = client
        .get(format!("http://{origin}/not-recorded"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);

    replay.shutdown();
}

#[tokio::test]
async fn test_connect_to_self_is_loop_detected() {
    let dir = tempfile::tempdir().unwrap();
    let server = replay_server(dir.path()).await;
    let addr = server.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let connect = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(connect.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = tokio::time::timeout(TEST_TIMEOUT, stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 508"), "{response}");
    assert!(response.contains("loop detected"));

    server.shutdown();
}

#[tokio::test]
async fn test_tls_replay_renders_templates() {
    let dir = tempfile::tempdir().unwrap();
    let req = Request::builder()
        .uri("https://replay.test/greeting?name=someone")
        .header("host", "replay.test")
        .body(Bytes::new())
        .unwrap();
    let res = Response::new(Bytes::from(r#"hello ${{ .Request.Query "name" }}"#));
    ArchiveStore::new(dir.path())
        .write(&Snapshot::new("greeting", &req, &res, Duration::ZERO))
        .unwrap();

    let server = replay_server(dir.path()).await;
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::all(server.url()).unwrap())
        .add_root_certificate(reqwest::Certificate::from_pem(CA.ca_cert_pem().as_bytes()).unwrap())
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap();

    let res = client
        .get("https://replay.test/greeting?name=ada")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-wiretap-cache-hit"], "true");
    assert_eq!(res.text().await.unwrap(), "hello ada");

    server.shutdown();
}

#[tokio::test]
async fn test_admin_health_reports_mode() {
    let dir = tempfile::tempdir().unwrap();
    let server = replay_server(dir.path()).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("{}/__admin/api/health", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let json: serde_json::Value = res.json().await.unwrap();
    assert_eq!(json["mode"], "replay");

    server.shutdown();
}
