//! Shared test utilities.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use readify_stream::descriptor::DEFAULT_CHUNK_SIZE;
use readify_stream::{AuthObserver, RangeListener, StreamSessionDescriptor, TransportError};

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Deterministic document bytes: byte `i` is `i % 251`.
pub fn document(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn descriptor(total_size: u64, initial_len: usize, session_token: &str) -> StreamSessionDescriptor {
    StreamSessionDescriptor {
        total_size,
        initial_chunk: StreamSessionDescriptor::encode_initial_chunk(&document(initial_len)),
        recommended_chunk_size: DEFAULT_CHUNK_SIZE,
        session_token: session_token.to_string(),
        watermark_signature: "wm-sig".to_string(),
        issued_at: "1700000000".to_string(),
    }
}

/// Listener recording every callback.
#[derive(Default)]
pub struct RecordingListener {
    pub chunks: Mutex<Vec<(u64, Bytes)>>,
    pub errors: Mutex<Vec<(u64, String)>>,
    pub progress: Mutex<Vec<(u64, u64)>>,
}

impl RecordingListener {
    pub fn chunks(&self) -> Vec<(u64, Bytes)> {
        let mut chunks = self.chunks.lock().unwrap().clone();
        chunks.sort_by_key(|(offset, _)| *offset);
        chunks
    }

    pub fn error_offsets(&self) -> Vec<u64> {
        self.errors.lock().unwrap().iter().map(|(o, _)| *o).collect()
    }
}

impl RangeListener for RecordingListener {
    fn on_data_range(&self, begin: u64, chunk: &Bytes) {
        self.chunks.lock().unwrap().push((begin, chunk.clone()));
    }

    fn on_range_error(&self, begin: u64, error: &TransportError) {
        self.errors.lock().unwrap().push((begin, error.to_string()));
    }

    fn on_progress(&self, loaded: u64, total: u64) {
        self.progress.lock().unwrap().push((loaded, total));
    }
}

/// Observer counting auth failures.
#[derive(Default)]
pub struct CountingObserver {
    pub failures: AtomicUsize,
}

impl CountingObserver {
    pub fn count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl AuthObserver for CountingObserver {
    fn on_auth_failure(&self, _context: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}
