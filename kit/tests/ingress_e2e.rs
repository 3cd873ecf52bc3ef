use aegis::prelude::*;
use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct RawResponse {
    status: u16,
    head: String,
    body: String,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_ascii_lowercase());
        self.head
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with(&prefix))
            .map(|line| line[prefix.len()..].trim().to_string())
    }
}

async fn send(addr: SocketAddr, request: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("response timed out")
        .unwrap();

    let raw = String::from_utf8_lossy(&raw).into_owned();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head.split_whitespace().nth(1).unwrap().parse().unwrap();
    let mut response = RawResponse {
        status,
        head: head.to_string(),
        body: body.to_string(),
    };
    if response.header("transfer-encoding").as_deref() == Some("chunked") {
        response.body = dechunk(&response.body);
    }
    response
}

fn dechunk(raw: &str) -> String {
    let mut out = String::new();
    let mut rest = raw;
    while let Some((size_line, tail)) = rest.split_once("\r\n") {
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
        if size == 0 {
            break;
        }
        out.push_str(&tail[..size]);
        rest = &tail[size + 2..];
    }
    out
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Server {
    async fn start(ingress: HttpIngress) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            ingress
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

fn trace_step(label: &'static str) -> SharedHandler {
    handler_fn(label, move |ctx| {
        Box::pin(async move {
            let mut order = ctx.get_value::<String>("order").unwrap_or_default();
            if !order.is_empty() {
                order.push('>');
            }
            order.push_str(label);
            ctx.set_value("order", order);
            ctx.next().await
        })
    })
}

fn show_user() -> SharedHandler {
    handler_fn("show_user", |ctx| {
        Box::pin(async move {
            let order = ctx.get_value::<String>("order").unwrap_or_default();
            let body = serde_json::json!({
                "id": ctx.param("id"),
                "order": format!("{order}>handler"),
            });
            ctx.json(StatusCode::OK, &body).await
        })
    })
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct NewUser {
    name: String,
    age: u32,
}

struct CreateUser;

#[async_trait]
impl Handler for CreateUser {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        let user: NewUser = ctx.body().await?;
        ctx.json(StatusCode::CREATED, &user).await
    }
}

struct Ticker;

#[async_trait]
impl Handler for Ticker {
    async fn handle(&self, ctx: &mut Context) -> ContextResult {
        let mut remaining = 3u32;
        ctx.stream_body(StatusCode::OK, "text/plain", |w| {
            let done = remaining == 0;
            remaining = remaining.saturating_sub(1);
            Box::pin(async move {
                if done {
                    return Err(StreamError::End);
                }
                w.write("tick;").await?;
                Ok(())
            })
        })
        .await
    }
}

fn app() -> HttpIngress {
    Aegis::http()
        .with_middleware(trace_step("A"))
        .with_middleware(trace_step("B"))
        .get("/users/{id}", show_user())
        .post("/users", Chain::new().then(CreateUser))
        .get("/ticks", Chain::new().then(Ticker))
        .post(
            "/ignore",
            handler_fn("ignore", |ctx| {
                Box::pin(async move { ctx.text(StatusCode::OK, "ignored").await })
            }),
        )
        .get(
            "/silent",
            handler_fn("silent", |ctx| {
                Box::pin(async move {
                    ctx.status(StatusCode::ACCEPTED);
                    Ok(())
                })
            }),
        )
}

#[tokio::test]
async fn middleware_runs_in_order_and_params_resolve() {
    let server = Server::start(app()).await;

    let response = send(server.addr, &get("/users/42")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type").as_deref(), Some("application/json"));
    assert!(response.header("x-request-id").is_some());
    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["id"], "42");
    assert_eq!(body["order"], "A>B>handler");

    server.stop().await;
}

#[tokio::test]
async fn unknown_path_is_json_404() {
    let server = Server::start(app()).await;

    let response = send(server.addr, &get("/nowhere")).await;
    assert_eq!(response.status, 404);
    let body: ErrorResponse = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body.status_code, 404);
    assert_eq!(body.path, "/nowhere");

    server.stop().await;
}

#[tokio::test]
async fn wrong_method_is_405_with_allow() {
    let server = Server::start(app()).await;

    let response = send(
        server.addr,
        "DELETE /users/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(response.status, 405);
    assert_eq!(response.header("allow").as_deref(), Some("GET"));

    server.stop().await;
}

#[tokio::test]
async fn json_body_round_trip() {
    let server = Server::start(app()).await;

    let payload = r#"{"name":"John","age":30}"#;
    let request = format!(
        "POST /users HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let response = send(server.addr, &request).await;
    assert_eq!(response.status, 201);
    let user: NewUser = serde_json::from_str(&response.body).unwrap();
    assert_eq!(user.name, "John");
    assert_eq!(user.age, 30);

    let request = "POST /users HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\
                   Content-Length: 5\r\nConnection: close\r\n\r\nhello";
    let response = send(server.addr, request).await;
    assert_eq!(response.status, 415);

    server.stop().await;
}

#[tokio::test]
async fn untouched_response_commits_current_status() {
    let server = Server::start(app()).await;

    let response = send(server.addr, &get("/silent")).await;
    assert_eq!(response.status, 202);
    assert!(response.body.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn streamed_response_is_chunked() {
    let server = Server::start(app()).await;

    let response = send(server.addr, &get("/ticks")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("transfer-encoding").as_deref(), Some("chunked"));
    assert_eq!(response.body.matches("tick;").count(), 3);

    server.stop().await;
}

#[tokio::test]
async fn cors_preflight_short_circuits() {
    let config = ServerConfig {
        enable_cors: true,
        ..ServerConfig::default()
    };
    let server = Server::start(app().config(config)).await;

    let response = send(
        server.addr,
        "OPTIONS /users HTTP/1.1\r\nHost: localhost\r\nOrigin: https://app.example\r\n\
         Access-Control-Request-Method: POST\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(response.status, 204);
    assert_eq!(
        response.header("access-control-allow-origin").as_deref(),
        Some("https://app.example")
    );

    server.stop().await;
}

#[tokio::test]
async fn unread_body_does_not_hold_the_connection() {
    let server = Server::start(app()).await;

    let payload = "x".repeat(4096);
    let request = format!(
        "POST /ignore HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\
         Content-Length: {}\r\n\r\n{payload}{}",
        payload.len(),
        get("/users/7")
    );
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    let finished = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw)).await;
    assert!(finished.is_ok(), "connection stayed open after the response");
    if !raw.is_empty() {
        assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 200"));
    }

    server.stop().await;
}
