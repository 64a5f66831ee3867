//! End-to-end tests over real WebSocket connections

use integration_tests::{eventually, TestServer};
use serde_json::json;
use std::sync::Arc;
use vibe_core::Socket;

fn echo(socket: &Arc<Socket>) {
    let me = Arc::clone(socket);
    socket.on("echo", move |incoming| {
        me.send("echo", incoming.data().clone()).ok();
    });
}

#[tokio::test]
async fn test_event_reaches_only_tagged_sockets() {
    let server = TestServer::start().await.unwrap();

    let mut alice = server.connect_as("alice", &["room:1"]).await.unwrap();
    let mut bob = server.connect_as("bob", &["room:1", "admin"]).await.unwrap();
    let mut carol = server.connect_as("carol", &["room:2"]).await.unwrap();

    let delivery = server.server.by_tag(["room:1"]).send("chat", json!("hi"));
    assert_eq!(delivery.matched, 2);
    assert_eq!(delivery.delivered, 2);

    for client in [&mut alice, &mut bob] {
        let frame = client.next_frame().await.unwrap();
        assert_eq!(frame["type"], "chat");
        assert_eq!(frame["data"], "hi");
    }

    server.server.by_tag(["room:1", "admin"]).send("secret", json!(1));
    server.server.by_id("carol").send("direct", json!(2));

    assert_eq!(bob.next_frame().await.unwrap()["type"], "secret");
    assert_eq!(carol.next_frame().await.unwrap()["type"], "direct");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_handler_receives_events_and_answers() {
    let server = TestServer::start_with(|server| {
        server.on_socket(echo);
    })
    .await
    .unwrap();
    let mut client = server.connect_as("echoer", &[]).await.unwrap();

    client
        .send(json!({"type": "echo", "data": {"text": "hello"}}))
        .await
        .unwrap();

    let frame = client.next_frame().await.unwrap();
    assert_eq!(frame["type"], "echo");
    assert_eq!(frame["data"]["text"], "hello");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_request_gets_reply() {
    let server = TestServer::start_with(|server| {
        server.on_socket(|socket| {
            socket.on("sum", |incoming| {
                let Some(reply) = incoming.reply() else {
                    return;
                };
                match incoming.data().as_array() {
                    Some(values) => {
                        let sum: i64 = values.iter().filter_map(|v| v.as_i64()).sum();
                        reply.resolve(json!(sum)).ok();
                    }
                    None => {
                        reply.reject(json!("expected an array")).ok();
                    }
                }
            });
        });
    })
    .await
    .unwrap();
    let mut client = server.connect_as("adder", &[]).await.unwrap();

    client
        .send(json!({"id": 7, "type": "sum", "data": [1, 2, 3], "reply": true}))
        .await
        .unwrap();
    let frame = client.next_frame().await.unwrap();
    assert_eq!(frame["type"], "reply");
    assert_eq!(frame["data"]["id"], 7);
    assert_eq!(frame["data"]["data"], 6);
    assert_eq!(frame["data"]["exception"], false);

    client
        .send(json!({"id": 8, "type": "sum", "data": "nope", "reply": true}))
        .await
        .unwrap();
    let frame = client.next_frame().await.unwrap();
    assert_eq!(frame["data"]["id"], 8);
    assert_eq!(frame["data"]["data"], "expected an array");
    assert_eq!(frame["data"]["exception"], true);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_request_resolved_by_client() {
    let server = TestServer::start().await.unwrap();
    let mut client = server.connect_as("answerer", &[]).await.unwrap();
    let socket = server.server.get("answerer").unwrap();

    let pending = tokio::spawn(async move { socket.request("question", json!("6*7?")).await });

    let frame = client.next_frame().await.unwrap();
    assert_eq!(frame["type"], "question");
    assert_eq!(frame["reply"], true);
    let id = frame["id"].as_u64().unwrap();

    client
        .send(json!({"type": "reply", "data": {"id": id, "data": 42, "exception": false}}))
        .await
        .unwrap();

    let answer = pending.await.unwrap().unwrap();
    assert_eq!(answer, json!(42));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_handshake_is_refused() {
    let server = TestServer::start().await.unwrap();

    let mut client = server.connect("id=x&transport=smoke-signals").await.unwrap();
    assert_eq!(client.next_close().await.unwrap(), Some(4003));

    let mut client = server.connect("id=y&transport=longpoll").await.unwrap();
    assert_eq!(client.next_close().await.unwrap(), Some(4003));
    assert!(server.server.is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_close_unregisters_socket() {
    let server = TestServer::start().await.unwrap();
    let client = server.connect_as("leaver", &["room:1"]).await.unwrap();

    let socket = server.server.get("leaver").unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    socket.on_close(move || {
        tx.send(()).ok();
    });

    client.close().await.unwrap();

    rx.recv().await.unwrap();
    eventually(|| server.server.get("leaver").is_none())
        .await
        .unwrap();
    assert_eq!(server.server.tag_count("room:1"), 0);

    // The id is free again
    let _again = server.connect_as("leaver", &[]).await.unwrap();

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_to_all_sockets() {
    let server = TestServer::start().await.unwrap();
    let mut clients = Vec::new();
    for id in ["a", "b", "c"] {
        clients.push(server.connect_as(id, &[]).await.unwrap());
    }

    let delivery = server.server.all().send("news", json!({"headline": "up"}));
    assert_eq!(delivery.delivered, 3);
    assert_eq!(delivery.failed, 0);

    for client in &mut clients {
        let frame = client.next_frame().await.unwrap();
        assert_eq!(frame["type"], "news");
        assert_eq!(frame["data"]["headline"], "up");
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_clients_normally() {
    let server = TestServer::start().await.unwrap();
    let mut client = server.connect_as("stayer", &[]).await.unwrap();

    assert_eq!(server.server.shutdown(), 1);
    assert_eq!(client.next_close().await.unwrap(), Some(1000));
    assert!(server.server.is_empty());

    server.stop().await.unwrap();
}
