//! External cache against a real HTTP backend through `ReqwestTransport`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use loopback_fetch::cache::{CacheRule, CacheRules, ExternalCache, ReqwestTransport};
use loopback_fetch::{FetchError, FetchOptions};
use serde_json::Value;

mod common;

async fn counting_backend(delay: Duration) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move |seen| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(delay).await;
            if seen.path.starts_with("/fail") {
                return (503, r#"{"error":"unavailable"}"#.to_string());
            }
            (200, format!(r#"{{"method":"{}","n":{}}}"#, seen.method, n))
        }
    })
    .await;
    (format!("http://{addr}"), hits)
}

fn cache(ttl: Duration) -> ExternalCache {
    let rules = CacheRules::new(vec![CacheRule::new(r"^http://127\.0\.0\.1:\d+/cached", ttl).unwrap()]);
    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    ExternalCache::new(rules, Arc::new(transport))
}

fn n(body: &Value) -> u64 {
    body["n"].as_u64().unwrap()
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let (base, hits) = counting_backend(Duration::ZERO).await;
    let cache = cache(Duration::from_millis(300));
    let url = format!("{base}/cached/item");

    let first: Value = cache.call(&url, FetchOptions::new()).await.unwrap().json().unwrap();
    let second: Value = cache.call(&url, FetchOptions::new()).await.unwrap().json().unwrap();
    assert_eq!(n(&first), 1);
    assert_eq!(n(&second), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let third: Value = cache.call(&url, FetchOptions::new()).await.unwrap().json().unwrap();
    assert_eq!(n(&third), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_request() {
    let (base, hits) = counting_backend(Duration::from_millis(150)).await;
    let cache = Arc::new(cache(Duration::from_secs(60)));
    let url = format!("{base}/cached/slow");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            cache.call(&url, FetchOptions::new()).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(n(&response.json().unwrap()), 1);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_post_always_reaches_backend() {
    let (base, hits) = counting_backend(Duration::ZERO).await;
    let cache = cache(Duration::from_secs(60));
    let url = format!("{base}/cached/orders");

    for expected in 1..=3 {
        let options = FetchOptions::new()
            .method(Method::POST)
            .header("content-type", "application/json")
            .unwrap()
            .body(r#"{"qty":1}"#);
        let body: Value = cache.call(&url, options).await.unwrap().json().unwrap();
        assert_eq!(body["method"], "POST");
        assert_eq!(n(&body), expected);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_the_call() {
    let (base, hits) = counting_backend(Duration::from_millis(100)).await;
    let cache = Arc::new(cache(Duration::from_secs(60)));
    let url = format!("{base}/cached/detached");

    let abandoned = {
        let cache = cache.clone();
        let url = url.clone();
        tokio::spawn(async move { cache.call(&url, FetchOptions::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    abandoned.abort();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.len(), 1);

    let body: Value = cache.call(&url, FetchOptions::new()).await.unwrap().json().unwrap();
    assert_eq!(n(&body), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let (base, _hits) = counting_backend(Duration::ZERO).await;
    let cache = cache(Duration::from_secs(60));

    let response = cache
        .call(&format!("{base}/fail"), FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(response.status_code(), 503);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let cache = cache(Duration::from_secs(60));
    let result = cache
        .call(&format!("http://{addr}/cached/gone"), FetchOptions::new())
        .await;
    assert!(matches!(result, Err(FetchError::Transport(_))));
    assert!(cache.is_empty());
}
