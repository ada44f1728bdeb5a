//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use loopback_fetch::{Registry, Service};

/// Method and path of a request seen by the mock backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the request line and returns the status code and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let _ = respond(socket, f.as_ref()).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn respond<F, Fut>(mut socket: TcpStream, f: &F) -> std::io::Result<()>
where
    F: Fn(SeenRequest) -> Fut,
    Fut: Future<Output = (u16, String)>,
{
    let head = read_head(&mut socket).await?;
    let (seen, content_length) = parse_head(&head);

    // Drain the body so closing the socket does not reset the connection.
    let mut remaining = content_length.saturating_sub(head.body_prefix);
    let mut sink = [0u8; 1024];
    while remaining > 0 {
        let n = socket.read(&mut sink).await?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    let (status, body) = f(seen).await;
    let status_text = match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_text,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}

struct Head {
    text: String,
    body_prefix: usize,
}

async fn read_head(socket: &mut TcpStream) -> std::io::Result<Head> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let text = String::from_utf8_lossy(&buf[..end]).to_string();
            return Ok(Head {
                text,
                body_prefix: buf.len() - (end + 4),
            });
        }
    }
    Ok(Head {
        text: String::from_utf8_lossy(&buf).to_string(),
        body_prefix: 0,
    })
}

fn parse_head(head: &Head) -> (SeenRequest, usize) {
    let mut lines = head.text.lines();
    let mut parts = lines.next().unwrap_or_default().split_whitespace();
    let seen = SeenRequest {
        method: parts.next().unwrap_or_default().to_string(),
        path: parts.next().unwrap_or_default().to_string(),
    };
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);
    (seen, content_length)
}

/// Serve `service` on an ephemeral port, returning its base URL.
pub async fn spawn_service(service: Service) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(service.serve(listener, std::future::pending()));
    format!("http://{addr}")
}

/// Build a service with the default configuration.
pub fn service(routes: Registry) -> Service {
    Service::new(routes).unwrap()
}

/// Client that never pools connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
