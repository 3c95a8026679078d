//! State store persistence tests - atomicity, debounce, flush, legacy load

use castwatch::store::{StatePatch, StateStore};
use std::time::Duration;

#[tokio::test]
async fn flush_after_update_round_trips_through_the_file() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let store = StateStore::load(&path);

    store.update(StatePatch {
        playlist_index: Some(1),
        video_index: Some(4),
        video_id: Some("abc".to_string()),
        current_time: Some(42.5),
        ..Default::default()
    });
    store.flush().await;

    let raw = std::fs::read_to_string(&path).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["playlistIndex"], 1);
    assert_eq!(on_disk["videoIndex"], 4);
    assert_eq!(on_disk["videoId"], "abc");
    assert_eq!(on_disk["currentTime"], 42.5);
}

#[tokio::test]
async fn flush_leaves_no_temp_file_behind() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let store = StateStore::load(&path);

    store.update(StatePatch { video_index: Some(1), ..Default::default() });
    store.flush().await;

    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists(), "temp file must be renamed away");
}

#[tokio::test]
async fn update_is_debounced_then_written() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let store = StateStore::load(&path);

    store.update(StatePatch { video_index: Some(7), ..Default::default() });
    // Inside the debounce window nothing has hit the disk yet.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!path.exists(), "write must wait out the debounce window");

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let raw = std::fs::read_to_string(&path).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["videoIndex"], 7);
}

#[tokio::test]
async fn coalesced_updates_produce_the_latest_contents() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    let store = StateStore::load(&path);

    store.update(StatePatch { video_index: Some(1), ..Default::default() });
    store.update(StatePatch { video_index: Some(2), ..Default::default() });
    store.update(StatePatch { current_time: Some(9.0), ..Default::default() });
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let raw = std::fs::read_to_string(&path).unwrap();
    let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["videoIndex"], 2);
    assert_eq!(on_disk["currentTime"], 9.0);
}

#[tokio::test]
async fn unparsable_file_starts_clean() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = StateStore::load(&path);
    let state = store.get();
    assert_eq!(state.playlist_index, 0);
    assert_eq!(state.video_index, 0);
    assert_eq!(state.current_time, 0.0);
}

#[tokio::test]
async fn legacy_file_without_playlist_index_loads() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("state.json");
    std::fs::write(&path, r#"{"videoIndex": 3, "videoId": "xyz", "currentTime": 10.5}"#).unwrap();

    let store = StateStore::load(&path);
    let state = store.get();
    assert_eq!(state.playlist_index, 0, "legacy files default the playlist index");
    assert_eq!(state.video_index, 3);
    assert_eq!(state.video_id, "xyz");
}

#[tokio::test]
async fn updated_at_is_monotonic_across_updates() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = StateStore::load(tmp.path().join("state.json"));

    store.update(StatePatch { video_index: Some(1), ..Default::default() });
    let first = store.get().updated_at;
    store.update(StatePatch { video_index: Some(2), ..Default::default() });
    let second = store.get().updated_at;
    assert!(second > first);
}

#[tokio::test]
async fn get_returns_a_defensive_copy() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = StateStore::load(tmp.path().join("state.json"));

    let mut copy = store.get();
    copy.video_index = 99;
    assert_eq!(store.get().video_index, 0, "mutating the copy must not touch the store");
}
