use std::time::Duration;

use courier_bridge::{HttpBridgeConfig, HttpMessenger};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    author: String,
    text: String,
}

/// Two peers on ephemeral ports, each posting to the other.
async fn peer_pair() -> (HttpMessenger, HttpMessenger) {
    let left = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let right = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let left_addr = left.local_addr().unwrap();
    let right_addr = right.local_addr().unwrap();

    let config = |remote: std::net::SocketAddr| HttpBridgeConfig {
        remote_url: format!("http://{remote}"),
        request_timeout: Duration::from_secs(2),
        ..HttpBridgeConfig::default()
    };
    let left = HttpMessenger::serve(left, config(right_addr)).await.unwrap();
    let right = HttpMessenger::serve(right, config(left_addr)).await.unwrap();
    (left, right)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_response_across_peers() {
    let (server, client) = peer_pair().await;

    let upper = server
        .messenger()
        .req_resp_channel::<String, String>("upper")
        .unwrap();
    upper
        .response_handler(|request| Some(request.to_uppercase()))
        .unwrap();

    let requester = client
        .messenger()
        .req_resp_channel::<String, String>("upper")
        .unwrap()
        .with_timeout(Duration::from_secs(2));
    let response = requester.request("ping".to_string()).await.unwrap();
    assert_eq!(response, "PING");
    assert_eq!(requester.conversation().pending_count(), 0);

    upper.close();
    requester.close();
    server.close();
    client.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_reaches_remote_listener() {
    let (receiver, sender) = peer_pair().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let notes = receiver.messenger().channel::<Note>("notes").unwrap();
    let agent = notes.new_agent().unwrap();
    agent
        .add_listener_fn(move |_agent, note: &Note| {
            let _ = tx.send(note.clone());
            Ok(())
        })
        .unwrap();

    let outgoing = sender.messenger().channel::<Note>("notes").unwrap();
    let note = Note {
        author: "ops".into(),
        text: "deploy finished".into(),
    };
    outgoing.send(&note).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, note);
    assert_eq!(notes.stats().delivered, 1);

    receiver.close();
    sender.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_channel_is_rejected() {
    let (peer, other) = peer_pair().await;
    let _known = peer.messenger().channel::<String>("known").unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://{}", peer.local_addr());

    let missing = client
        .post(format!("{base}/missing"))
        .body("\"x\"")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let known = client
        .post(format!("{base}/known"))
        .body("\"x\"")
        .send()
        .await
        .unwrap();
    assert_eq!(known.status(), reqwest::StatusCode::OK);

    peer.close();
    other.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_to_closed_peer_fails() {
    let (closed, open) = peer_pair().await;
    closed.close();
    closed.join().await;

    let channel = open.messenger().channel::<String>("gone").unwrap();
    let result = channel.send(&"hello".to_string()).await;
    assert!(result.is_err());
    assert_eq!(channel.stats().send_failures, 1);

    open.close();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = HttpMessenger::serve(listener, HttpBridgeConfig::default())
        .await
        .unwrap();
    let _channel = peer.messenger().channel::<String>("once").unwrap();
    assert!(peer.transport().is_subscribed("once"));

    peer.close();
    peer.close();
    peer.join().await;
    assert!(peer.messenger().is_closed());
    assert!(!peer.transport().is_subscribed("once"));
}
