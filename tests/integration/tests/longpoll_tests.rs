//! End-to-end tests for the HTTP long polling transport

use integration_tests::{eventually, test_config, TestServer};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;

async fn open(server: &TestServer, query: &str) -> String {
    let response = server
        .get(&format!("/vibe?transport=longpoll&when=open&{query}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn poll(server: &TestServer, id: &str) -> Vec<Value> {
    let response = server.get(&format!("/vibe?id={id}&when=poll")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_open_send_and_poll() {
    let server = TestServer::start_with(|server| {
        server.on_socket(|socket| {
            let me = Arc::clone(socket);
            socket.on("echo", move |incoming| {
                me.send("echo", incoming.data().clone()).ok();
            });
        });
    })
    .await
    .unwrap();

    let id = open(&server, "id=poller&tags=web").await;
    assert_eq!(id, "poller");
    assert!(server.server.get("poller").unwrap().has_tag("web"));

    let response = server
        .post(
            &format!("/vibe?id={id}&when=send"),
            json!([
                {"type": "echo", "data": 1},
                {"type": "echo", "data": 2}
            ])
            .to_string(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let frames = poll(&server, &id).await;
    let data: Vec<&Value> = frames.iter().map(|frame| &frame["data"]).collect();
    assert_eq!(data, [&json!(1), &json!(2)]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_open_generates_id() {
    let server = TestServer::start().await.unwrap();

    let id = open(&server, "").await;
    assert!(!id.is_empty());
    assert!(server.server.get(&id).is_some());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_parked_poll_receives_later_frame() {
    let server = TestServer::start().await.unwrap();
    let id = open(&server, "id=waiter").await;

    let url = format!("{}/vibe?id={id}&when=poll", server.base_url());
    let client = server.client.clone();
    let parked = tokio::spawn(async move {
        let response = client.get(&url).send().await.unwrap();
        response.json::<Vec<Value>>().await.unwrap()
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!parked.is_finished());

    server.server.by_id("waiter").send("wake", json!("up"));

    let frames = parked.await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "wake");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_abort_ends_session() {
    let server = TestServer::start().await.unwrap();
    let id = open(&server, "id=quitter").await;

    let response = server.get(&format!("/vibe?id={id}&when=abort")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    eventually(|| server.server.get("quitter").is_none())
        .await
        .unwrap();

    let response = server.get(&format!("/vibe?id={id}&when=poll")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_session_times_out() {
    let config = test_config(&[("LONGPOLL_TIMEOUT_MS", "200")]).unwrap();
    let server = TestServer::start_with_config(config, |_| {}).await.unwrap();
    let id = open(&server, "id=sleeper").await;

    let socket = server.server.get(&id).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    socket.on_error(move |err| {
        tx.send(err.to_string()).ok();
    });

    let reason = rx.recv().await.unwrap();
    assert!(reason.contains("timed out"));

    eventually(|| server.server.get("sleeper").is_none())
        .await
        .unwrap();

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_bad_requests() {
    let server = TestServer::start().await.unwrap();

    let response = server.get("/vibe?id=nobody&when=poll").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.get("/vibe?id=nobody&when=send").await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = server.get("/vibe?transport=longpoll").await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    open(&server, "id=twice").await;
    let response = server
        .get("/vibe?transport=longpoll&when=open&id=twice")
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    server.stop().await.unwrap();
}
