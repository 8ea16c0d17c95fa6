//! TamTam origin client against programmable backends.

use serde_json::json;
use std::sync::{Arc, Mutex};

use update_relay::config::OriginConfig;
use update_relay::origin::{OriginClient, OriginKind, TamTamClient, WorkerIdentity};

mod common;

fn recorder() -> Arc<Mutex<Vec<(String, String)>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Value of `name` in the query string of an HTTP request line.
fn query_param<'a>(request_line: &'a str, name: &str) -> Option<&'a str> {
    let query = request_line.split_whitespace().nth(1)?.split_once('?')?.1;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
}

#[tokio::test]
async fn test_tamtam_fetch_tracks_marker_and_marks_seen() {
    let requests = recorder();
    let seen = requests.clone();
    let addr = common::start_programmable_backend(move |line, body| {
        seen.lock().unwrap().push((line.to_string(), body.to_string()));
        if line.starts_with("GET /updates") {
            (
                200,
                r#"{"updates":[{"update_type":"message_created","message":{"recipient":{"chat_id":1001},"sender":{"name":"Alice"},"body":{"text":"hello"}}}],"marker":42}"#.to_string(),
            )
        } else {
            (200, r#"{"success":true}"#.to_string())
        }
    })
    .await;

    let config = OriginConfig {
        base_url: format!("http://{}", addr),
        ..OriginConfig::default()
    };
    let mut client = TamTamClient::new(WorkerIdentity::new("token-abcd"), &config);
    client.open().await.unwrap();

    let message = client.fetch_next_update().await.unwrap().unwrap();
    assert_eq!(message.chat_id, 1001);
    assert_eq!(message.text.as_deref(), Some("hello"));
    assert_eq!(message.chat_user_name.as_deref(), Some("Alice"));
    assert_eq!(message.origin, OriginKind::TamTam);
    assert_eq!(client.marker(), Some("42"));

    client.fetch_next_update().await.unwrap();
    client.close().await;

    let requests = requests.lock().unwrap();
    let polls: Vec<_> = requests.iter().filter(|(l, _)| l.starts_with("GET /updates")).collect();
    assert_eq!(polls.len(), 2);
    assert!(polls[0].0.contains("access_token=token-abcd"));
    assert!(!polls[0].0.contains("marker="));
    assert!(polls[1].0.contains("marker=42"));

    let acks: Vec<_> = requests
        .iter()
        .filter(|(l, _)| l.starts_with("POST /chats/1001/actions"))
        .collect();
    assert_eq!(acks.len(), 2);
    assert!(acks[0].1.contains("mark_seen"));
}

#[tokio::test]
async fn test_tamtam_status_error() {
    let addr = common::start_programmable_backend(|_, _| (503, "{}".to_string())).await;
    let config = OriginConfig {
        base_url: format!("http://{}/", addr),
        ..OriginConfig::default()
    };
    let mut client = TamTamClient::new(WorkerIdentity::new("token-abcd"), &config);
    client.open().await.unwrap();

    let err = client.fetch_next_update().await.unwrap_err();
    assert!(matches!(err, update_relay::origin::FetchError::Status(503)));
}

#[tokio::test]
async fn test_each_pending_update_is_delivered() {
    let requests = recorder();
    let seen = requests.clone();
    // Serves `limit` updates after `marker`, and moves the marker past them.
    let addr = common::start_programmable_backend(move |line, body| {
        seen.lock().unwrap().push((line.to_string(), body.to_string()));
        if !line.starts_with("GET /updates") {
            return (200, r#"{"success":true}"#.to_string());
        }

        let chats = [2001_i64, 2002, 2003];
        let start: usize = query_param(line, "marker").and_then(|m| m.parse().ok()).unwrap_or(0);
        let limit: usize = query_param(line, "limit").and_then(|l| l.parse().ok()).unwrap_or(100);
        let end = (start + limit).min(chats.len());
        let updates: Vec<_> = chats[start.min(end)..end]
            .iter()
            .map(|chat_id| {
                json!({
                    "update_type": "message_created",
                    "message": { "recipient": { "chat_id": chat_id }, "body": { "text": "hi" } }
                })
            })
            .collect();

        (200, json!({ "updates": updates, "marker": end }).to_string())
    })
    .await;

    let config = OriginConfig {
        base_url: format!("http://{}", addr),
        ..OriginConfig::default()
    };
    let mut client = TamTamClient::new(WorkerIdentity::new("token-abcd"), &config);
    client.open().await.unwrap();

    let mut delivered = Vec::new();
    for _ in 0..4 {
        if let Some(message) = client.fetch_next_update().await.unwrap() {
            delivered.push(message.chat_id);
        }
    }
    client.close().await;

    assert_eq!(delivered, vec![2001, 2002, 2003]);
    let requests = requests.lock().unwrap();
    assert!(requests
        .iter()
        .filter(|(l, _)| l.starts_with("GET /updates"))
        .all(|(l, _)| query_param(l, "limit") == Some("1")));
}
