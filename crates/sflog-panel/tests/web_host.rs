mod common;

use common::{summary, ScriptedListing};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use sflog_core::PanelTemplate;
use sflog_panel::detail::DetailFetcher;
use sflog_panel::poller::Poller;
use sflog_panel::web::{router, WebHost, WebHostConfig};
use sflog_panel::{ControllerHandle, Host, PanelController};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

struct Server {
    addr: SocketAddr,
    web: WebHost,
    handle: ControllerHandle,
    output_dir: PathBuf,
    _dir: tempfile::TempDir,
}

async fn start() -> Server {
    let listing = ScriptedListing::new(vec![Ok(vec![summary("07L1")])]);
    start_with(listing, Duration::from_secs(5)).await
}

async fn start_with(listing: Arc<ScriptedListing>, interval: Duration) -> Server {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("developerLogs");
    let web = WebHost::new(WebHostConfig {
        url: String::new(),
        opener: "true".to_string(),
        open_browser: false,
    });
    let host: Arc<dyn Host> = Arc::new(web.clone());
    let poller = Poller::new(listing, Arc::clone(&host), interval);
    let detail = DetailFetcher::new(
        Arc::clone(&host),
        output_dir.clone(),
        r#"printf '{"status":0,"result":[{"log":"full %s"}]}' {id}"#,
    );
    let (controller, handle) = PanelController::new(host, PanelTemplate::default(), poller, detail);
    tokio::spawn(controller.run());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(web.clone(), handle.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    Server {
        addr,
        web,
        handle,
        output_dir,
        _dir: dir,
    }
}

async fn http(addr: SocketAddr, request: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn health_and_shell_page_are_served() {
    let server = start().await;
    let health = http(
        server.addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("ok"));

    let page = http(
        server.addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(page.contains("/commands/show-logs"));
}

#[tokio::test]
async fn show_logs_command_opens_the_panel() {
    let server = start().await;
    let response = http(
        server.addr,
        "POST /commands/show-logs HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");
    let web = server.web.clone();
    wait_for(move || web.active_panel().is_some()).await;
}

#[tokio::test]
async fn socket_receives_rows_and_relays_selection() {
    let server = start().await;
    assert!(server.handle.show_logs());
    let web = server.web.clone();
    wait_for(move || {
        web.current_html()
            .is_some_and(|html| html.contains("data-log-id=\"07L1\""))
    })
    .await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    let first = match socket.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("unexpected frame: {other:?}"),
    };
    assert_eq!(first["type"], "html");
    assert!(first["html"].as_str().unwrap().contains("<td>07L1</td>"));

    socket
        .send(Message::Text(
            r#"{"command":"callFunction","id":"07L1"}"#.to_string(),
        ))
        .await
        .unwrap();
    let log = server.output_dir.join("07L1.log");
    let expected = log.clone();
    wait_for(move || std::fs::read_to_string(&expected).is_ok_and(|body| body == "full 07L1")).await;

    socket.close(None).await.unwrap();
    let web = server.web.clone();
    wait_for(move || web.active_panel().is_none()).await;
}

#[tokio::test]
async fn socket_without_a_panel_is_told_it_is_detached() {
    let server = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    match socket.next().await {
        Some(Ok(Message::Text(text))) => {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "detached");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn unchanged_listing_sends_html_once() {
    let results = (0..200).map(|_| Ok(vec![summary("07L1")])).collect();
    let listing = ScriptedListing::new(results);
    let server = start_with(Arc::clone(&listing), Duration::from_millis(100)).await;
    assert!(server.handle.show_logs());
    let web = server.web.clone();
    wait_for(move || {
        web.current_html()
            .is_some_and(|html| html.contains("data-log-id=\"07L1\""))
    })
    .await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    match socket.next().await {
        Some(Ok(Message::Text(text))) => {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "html");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let seen = listing.calls();
    let polled = Arc::clone(&listing);
    wait_for(move || polled.calls() >= seen + 4).await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, socket.next()).await {
        if let Ok(Message::Text(text)) = frame {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_ne!(frame["type"], "html", "repeated html frame: {text}");
        }
    }
}
