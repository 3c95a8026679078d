//! Notifier dispatch tests against a local webhook capture endpoint

mod helpers;

use castwatch::config::NotifierConfig;
use castwatch::notifier;
use helpers::spawn_webhook_capture;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn wait_for_requests(
    captured: &Arc<Mutex<Vec<Value>>>,
    count: usize,
    timeout: Duration,
) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let requests = captured.lock().unwrap();
            if requests.len() >= count {
                return requests.clone();
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return captured.lock().unwrap().clone();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn error_flushes_immediately_and_drags_the_queue_along() {
    let (url, captured) = spawn_webhook_capture().await;
    let config = NotifierConfig {
        webhook_url: url,
        role_mention: "<@&777>".to_string(),
        ..NotifierConfig::default()
    };
    let handle = notifier::spawn(config, CancellationToken::new());

    handle.notify_resume(4, "abc"); // info
    handle.notify_host_disconnect(); // warn
    handle.notify_critical("player is gone"); // error -> flush now

    let requests = wait_for_requests(&captured, 1, Duration::from_secs(3)).await;
    assert_eq!(requests.len(), 1, "one combined request: {requests:?}");

    let body = &requests[0];
    let embed = &body["embeds"][0];
    let description = embed["description"].as_str().unwrap();
    assert!(description.contains("recovered on video 4"));
    assert!(description.contains("streaming host"));
    assert!(description.contains("player is gone"));
    assert_eq!(embed["color"], 15_158_332, "highest level wins the color");
    assert_eq!(embed["footer"]["text"], "3 events");
    assert_eq!(body["content"], "<@&777>", "role mention rides on error flushes");
}

#[tokio::test]
async fn infos_are_debounced_into_one_batch() {
    let (url, captured) = spawn_webhook_capture().await;
    let config = NotifierConfig {
        webhook_url: url,
        role_mention: "<@&777>".to_string(),
        ..NotifierConfig::default()
    };
    let handle = notifier::spawn(config, CancellationToken::new());

    handle.notify_resume(1, "a");
    handle.notify_stream_restart(2);

    // Still inside the debounce window.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(captured.lock().unwrap().is_empty(), "debounce must hold the batch back");

    let requests = wait_for_requests(&captured, 1, Duration::from_secs(6)).await;
    assert_eq!(requests.len(), 1);

    let body = &requests[0];
    let embed = &body["embeds"][0];
    assert_eq!(embed["color"], 3_447_003);
    assert_eq!(embed["footer"]["text"], "2 events");
    assert!(
        body.get("content").is_none(),
        "role mention only accompanies error-level flushes"
    );
}

#[tokio::test]
async fn identity_fields_ride_on_the_payload() {
    let (url, captured) = spawn_webhook_capture().await;
    let config = NotifierConfig {
        webhook_url: url,
        username: "castwatch".to_string(),
        avatar_url: "http://example.invalid/a.png".to_string(),
        ..NotifierConfig::default()
    };
    let handle = notifier::spawn(config, CancellationToken::new());

    handle.notify_critical("boom");

    let requests = wait_for_requests(&captured, 1, Duration::from_secs(3)).await;
    let body = &requests[0];
    assert_eq!(body["username"], "castwatch");
    assert_eq!(body["avatar_url"], "http://example.invalid/a.png");
    assert_eq!(body["embeds"][0]["footer"]["text"], "castwatch", "no event count for a single alert");
}
