//! Integration tests driving the HTTP surface through the router

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FixedUsage, mib};
use memstress::allocator::Allocator;
use memstress::config::{AllocConfig, PacingMode};
use memstress::server::{AppState, router};
use memstress::store::MemoryStore;
use memstress::usage::UsageProbe;
use tower::ServiceExt;

/// State with a small batch, a pinned usage reading, and a fresh store
fn test_state(batch_size: u32, allocated_mib: u64, ceiling_mib: u64) -> AppState {
    let store = Arc::new(MemoryStore::new());
    let usage: Arc<dyn UsageProbe> = Arc::new(FixedUsage(mib(allocated_mib)));
    let config = AllocConfig {
        batch_size,
        ceiling_mib,
        pacing: PacingMode::Fast,
    };
    let allocator = Arc::new(Allocator::new(
        Arc::clone(&store),
        Arc::clone(&usage),
        &config,
    ));
    AppState {
        store,
        allocator,
        usage,
    }
}

async fn get(app: Router, path: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .expect("request handled");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    (status, String::from_utf8(bytes.to_vec()).expect("utf-8 body"))
}

#[tokio::test]
async fn status_reports_usage_without_side_effects() {
    let state = test_state(3, 0, 1000);
    let app = router(state.clone());

    let (status, body) = get(app, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Current memory usage"));
    assert!(body.contains("Alloc = "));
    assert!(body.contains("MiB"));
    assert_eq!(state.store.block_count(), 0, "status must not allocate");
}

#[tokio::test]
async fn consume_allocates_one_batch() {
    let state = test_state(3, 0, 1000);
    let app = router(state.clone());

    let (status, body) = get(app.clone(), "/consumemem").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Current memory usage"));
    assert_eq!(state.store.block_count(), 3);

    let (status, _) = get(app, "/consumemem").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.store.block_count(), 6);
}

#[tokio::test]
async fn consume_is_noop_at_ceiling_but_still_succeeds() {
    let state = test_state(3, 1000, 1000);
    let app = router(state.clone());

    let (status, body) = get(app, "/consumemem").await;

    assert_eq!(status, StatusCode::OK, "callers never see allocation outcomes");
    assert!(body.contains("Current memory usage"));
    assert_eq!(state.store.block_count(), 0);
}

#[tokio::test]
async fn clear_empties_the_store() {
    let state = test_state(4, 0, 1000);
    let app = router(state.clone());

    let (_, _) = get(app.clone(), "/consumemem").await;
    assert_eq!(state.store.block_count(), 4);

    let (status, body) = get(app, "/clearmem").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Memory has been cleared"));
    assert_eq!(state.store.block_count(), 0);
}

#[tokio::test]
async fn clear_is_idempotent() {
    let state = test_state(2, 0, 1000);
    let app = router(state.clone());

    let (first, _) = get(app.clone(), "/clearmem").await;
    let (second, _) = get(app, "/clearmem").await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(state.store.block_count(), 0);
}

#[tokio::test]
async fn metrics_exposition_covers_request_counters() {
    let state = test_state(2, 0, 1000);
    let app = router(state);

    let (_, _) = get(app.clone(), "/").await;
    let (status, body) = get(app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("memstress_http_requests_total"));
    assert!(body.contains("memstress_build_info"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let state = test_state(2, 0, 1000);
    let app = router(state);

    let (status, _) = get(app, "/definitely-not-a-route").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
