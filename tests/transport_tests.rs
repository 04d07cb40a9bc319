//! Integration tests for the client-side range transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CountingObserver, RecordingListener, can_bind_localhost, descriptor, document};
use httpmock::Method::GET;
use httpmock::MockServer;
use readify_stream::{
    ArtifactStore, DirectoryArtifactStore, MemoryArtifactStore, RangeTransport, ReadAt,
    StaticCredentials, TransportError, TransportOptions,
};
use reqwest::Url;

const TOTAL: u64 = 1_000_000;

fn proxy_url(server: &MockServer) -> Url {
    Url::parse(&server.url("/api/books/7/stream?sessionToken=tok-1")).unwrap()
}

fn options(listener: &Arc<RecordingListener>) -> TransportOptions {
    TransportOptions {
        max_retry: 1,
        ..TransportOptions::default()
    }
    .with_listener(listener.clone())
}

#[tokio::test]
async fn test_initial_state_from_descriptor() {
    let listener = Arc::new(RecordingListener::default());
    let transport = RangeTransport::new(
        &descriptor(TOTAL, 4096, "tok-1"),
        Url::parse("http://127.0.0.1:9/api/books/7/stream").unwrap(),
        options(&listener),
    )
    .unwrap();

    assert_eq!(transport.length(), TOTAL);
    assert_eq!(transport.initial_data().len(), 4096);
    assert_eq!(transport.initial_data().as_ref(), document(4096).as_slice());
    assert_eq!(transport.transferred_bytes(), 0);
    assert!(!transport.is_aborted());
}

#[tokio::test]
async fn test_invalid_initial_chunk_fails_construction() {
    let mut desc = descriptor(TOTAL, 16, "tok-1");
    desc.initial_chunk = "not base64!!".to_string();
    let result = RangeTransport::new(
        &desc,
        Url::parse("http://127.0.0.1:9/").unwrap(),
        TransportOptions::default(),
    );
    assert!(matches!(result, Err(TransportError::Decode(_))));
}

#[tokio::test]
async fn test_request_range_delivers_tagged_chunk() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let data = document(1024);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/books/7/stream")
                .query_param("sessionToken", "tok-1")
                .header("range", "bytes=0-1023")
                .header("accept", "application/pdf")
                .header("x-readify-session", "tok-1")
                .header("x-readify-watermark", "wm-sig")
                .header("x-readify-issued-at", "1700000000")
                .header("authorization", "Bearer jwt-1")
                .header("cookie", "token=jwt-1");
            then.status(206)
                .header("content-range", "bytes 0-1023/1000000")
                .body(&data);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let options = TransportOptions {
        auth_cookie: Some("token".to_string()),
        ..options(&listener)
    }
    .with_credentials(Arc::new(StaticCredentials::new("jwt-1")));
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 4096, "tok-1"), proxy_url(&server), options)
            .unwrap();

    transport.request_range(0, 1023).await.unwrap();

    mock.assert_async().await;
    let chunks = listener.chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].0, 0);
    assert_eq!(chunks[0].1.as_ref(), data.as_slice());
    assert_eq!(transport.transferred_bytes(), 1024);
    assert_eq!(transport.request_count(), 1);
    assert!(listener.errors.lock().unwrap().is_empty());
    let progress = listener.progress.lock().unwrap().clone();
    assert_eq!(progress, vec![(4096 + 1024, TOTAL)]);
}

#[tokio::test]
async fn test_concurrent_ranges_are_delivered_by_offset() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let first = document(2048)[..1024].to_vec();
    let second = document(2048)[1024..].to_vec();
    // The earlier range completes last.
    server
        .mock_async(|when, then| {
            when.method(GET).header("range", "bytes=0-1023");
            then.status(206)
                .header("content-range", "bytes 0-1023/1000000")
                .delay(Duration::from_millis(300))
                .body(&first);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).header("range", "bytes=1024-2047");
            then.status(206)
                .header("content-range", "bytes 1024-2047/1000000")
                .body(&second);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let (a, b) = tokio::join!(transport.request_range(0, 1023), transport.request_range(1024, 2047));
    a.unwrap();
    b.unwrap();

    let arrival: Vec<u64> = listener.chunks.lock().unwrap().iter().map(|(o, _)| *o).collect();
    assert_eq!(arrival, vec![1024, 0]);

    let chunks = listener.chunks();
    assert_eq!(chunks[0].0, 0);
    assert_eq!(chunks[0].1.as_ref(), first.as_slice());
    assert_eq!(chunks[1].0, 1024);
    assert_eq!(chunks[1].1.as_ref(), second.as_slice());
}

#[tokio::test]
async fn test_short_body_is_continued() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let data = document(1024);
    let head = server
        .mock_async(|when, then| {
            when.method(GET).header("range", "bytes=0-1023");
            then.status(206)
                .header("content-range", "bytes 0-511/1000000")
                .body(&data[..512]);
        })
        .await;
    let tail = server
        .mock_async(|when, then| {
            when.method(GET).header("range", "bytes=512-1023");
            then.status(206)
                .header("content-range", "bytes 512-1023/1000000")
                .body(&data[512..]);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let chunk = transport.fetch_range(0, 1023).await.unwrap();

    head.assert_async().await;
    tail.assert_async().await;
    assert_eq!(chunk.as_ref(), data.as_slice());
    assert_eq!(transport.transferred_bytes(), 1024);
}

#[tokio::test]
async fn test_full_body_response_is_sliced() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let whole = document(4096);
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(200).body(&whole);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(4096, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let chunk = transport.fetch_range(1000, 1999).await.unwrap();
    assert_eq!(chunk.as_ref(), &whole[1000..2000]);
}

#[tokio::test]
async fn test_content_range_mismatch_is_an_error() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(206)
                .header("content-range", "bytes 5-1028/1000000")
                .body(document(1024));
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let err = transport.fetch_range(0, 1023).await.unwrap_err();
    assert!(matches!(err, TransportError::ContentRangeMismatch { expected: 0, .. }));
}

#[tokio::test]
async fn test_invalid_range_is_rejected_without_request() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(206);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(1000, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    assert!(matches!(
        transport.fetch_range(10, 5).await,
        Err(TransportError::InvalidRange { .. })
    ));
    assert!(matches!(
        transport.fetch_range(0, 1000).await,
        Err(TransportError::InvalidRange { .. })
    ));
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn test_abort_is_idempotent_and_stops_requests() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(206)
                .header("content-range", "bytes 0-1023/1000000")
                .body(document(1024));
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    transport.abort();
    transport.abort();
    assert!(transport.is_aborted());

    let err = transport.fetch_range(0, 1023).await.unwrap_err();
    assert!(err.is_cancelled());
    transport.request_range(0, 1023).await.unwrap();

    assert!(listener.chunks().is_empty());
    assert!(listener.errors.lock().unwrap().is_empty());
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn test_abort_cancels_in_flight_request_quietly() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(206)
                .header("content-range", "bytes 0-1023/1000000")
                .delay(Duration::from_secs(5))
                .body(document(1024));
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport = Arc::new(
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap(),
    );

    let in_flight = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.request_range(0, 1023).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.abort();

    let result = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .expect("aborted request should resolve promptly")
        .unwrap();
    assert!(result.is_ok());
    assert!(listener.chunks().is_empty());
    assert!(listener.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_server_error_reaches_error_callback() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(500)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"boom"}"#);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(TOTAL, 0, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let err = transport.request_range(2048, 4095).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status } if status.as_u16() == 500));
    assert_eq!(listener.error_offsets(), vec![2048]);
    assert!(listener.chunks().is_empty());
}

#[tokio::test]
async fn test_unauthorized_notifies_observer() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(401)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"Unauthorized"}"#);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let observer = Arc::new(CountingObserver::default());
    let transport = RangeTransport::new(
        &descriptor(TOTAL, 0, "tok-1"),
        proxy_url(&server),
        options(&listener).with_auth_observer(observer.clone()),
    )
    .unwrap();

    let err = transport.request_range(0, 1023).await.unwrap_err();
    assert!(matches!(err, TransportError::Unauthorized));
    assert_eq!(observer.count(), 1);
    assert_eq!(listener.error_offsets(), vec![0]);
}

#[tokio::test]
async fn test_session_artifacts_purged_on_create_and_abort() {
    let store = Arc::new(MemoryArtifactStore::new("session"));
    store.insert("pdfjs.history", b"{}".to_vec());
    store.insert("reader-last-page", b"12".to_vec());
    store.insert("locale", b"sr".to_vec());

    let transport = RangeTransport::new(
        &descriptor(TOTAL, 16, "tok-1"),
        Url::parse("http://127.0.0.1:9/api/books/7/stream").unwrap(),
        TransportOptions::default()
            .with_artifact_store(store.clone())
            .with_document_id("7"),
    )
    .unwrap();

    assert!(!store.contains("pdfjs.history"));
    assert!(!store.contains("reader-last-page"));
    assert!(store.contains("locale"));

    // Written during the session, gone after abort.
    store.insert("book-7-progress", b"0.4".to_vec());
    transport.abort();
    assert!(!store.contains("book-7-progress"));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_directory_artifacts_purged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("book-9.pdf"), b"%PDF").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

    let store: Arc<dyn ArtifactStore> = Arc::new(DirectoryArtifactStore::new(dir.path()));
    let _transport = RangeTransport::new(
        &descriptor(TOTAL, 16, "tok-1"),
        Url::parse("http://127.0.0.1:9/").unwrap(),
        TransportOptions::default()
            .with_artifact_store(store)
            .with_document_id("9"),
    )
    .unwrap();

    assert!(!dir.path().join("book-9.pdf").exists());
    assert!(dir.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_read_at_uses_initial_chunk_then_network() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let whole = document(8192);
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).header("range", "bytes=4000-4199");
            then.status(206)
                .header("content-range", "bytes 4000-4199/8192")
                .body(&whole[4000..4200]);
        })
        .await;

    let listener = Arc::new(RecordingListener::default());
    let transport =
        RangeTransport::new(&descriptor(8192, 4096, "tok-1"), proxy_url(&server), options(&listener))
            .unwrap();

    let mut buf = vec![0u8; 100];
    assert_eq!(transport.read_at(10, &mut buf).await.unwrap(), 100);
    assert_eq!(buf.as_slice(), &whole[10..110]);
    assert_eq!(mock.hits_async().await, 0);

    let mut buf = vec![0u8; 200];
    assert_eq!(transport.read_at(4000, &mut buf).await.unwrap(), 200);
    assert_eq!(buf.as_slice(), &whole[4000..4200]);
    mock.assert_async().await;

    let mut buf = vec![0u8; 10];
    assert_eq!(transport.read_at(8192, &mut buf).await.unwrap(), 0);
    assert_eq!(transport.size(), 8192);

    // Exact reads inside the inline prefix need no network either.
    transport.read_exact_at(20, &mut buf).await.unwrap();
    assert_eq!(buf.as_slice(), &whole[20..30]);
    assert_eq!(mock.hits_async().await, 1);
}
