//! Port for HTTP downloads.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Performs a plain HTTP GET.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Downloads `path` from the host at `base_url` and returns the body.
    async fn fetch(&self, base_url: &str, path: &str) -> CacheResult<Bytes>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::domain::errors::CacheError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Fetcher serving canned bodies by path, optionally held back by a gate.
    pub struct StubFetcher {
        responses: Mutex<HashMap<String, CacheResult<Bytes>>>,
        calls: AtomicUsize,
        finished: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl StubFetcher {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                gate: None,
            }
        }

        /// Every fetch waits for a permit released with [`Self::release`].
        pub fn gated() -> Self {
            Self {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Self::new()
            }
        }

        pub fn respond(&self, path: &str, body: &'static [u8]) {
            self.responses
                .lock()
                .insert(path.to_string(), Ok(Bytes::from_static(body)));
        }

        pub fn fail(&self, path: &str, message: &str) {
            self.responses
                .lock()
                .insert(path.to_string(), Err(CacheError::fetch(message)));
        }

        pub fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Fetches that got past the gate.
        pub fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    impl Default for StubFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl HttpFetcher for StubFetcher {
        async fn fetch(&self, _base_url: &str, path: &str) -> CacheResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| CacheError::fetch(e.to_string()))?
                    .forget();
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .get(path)
                .cloned()
                .unwrap_or_else(|| Err(CacheError::fetch("HTTP 404 Not Found")))
        }
    }
}
