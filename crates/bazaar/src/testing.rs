//! In-memory registry used by unit tests.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::download::{DownloadProgress, ProgressCallback};
use crate::error::{BazaarError, Result};
use crate::transport::RegistryTransport;

pub(crate) const REGISTRY: &str = "https://oss.test";

#[derive(Default)]
pub(crate) struct MemoryTransport {
    routes: Mutex<HashMap<String, Bytes>>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<(String, serde_json::Value)>>,
    offline: AtomicBool,
    delay: Mutex<Duration>,
    active: Mutex<HashMap<String, usize>>,
    max_same_url: AtomicUsize,
    active_total: AtomicUsize,
    max_total: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.routes.lock().unwrap().insert(url.into(), body.into());
    }

    pub fn unroute(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn get_count(&self, url: &str) -> usize {
        self.gets.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn posts(&self) -> Vec<(String, serde_json::Value)> {
        self.posts.lock().unwrap().clone()
    }

    /// Highest number of concurrent requests seen for any single URL.
    pub fn max_same_url(&self) -> usize {
        self.max_same_url.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent requests seen overall.
    pub fn max_total(&self) -> usize {
        self.max_total.load(Ordering::SeqCst)
    }

    fn enter(&self, url: &str) {
        let mut active = self.active.lock().unwrap();
        let n = active.entry(url.to_string()).or_insert(0);
        *n += 1;
        self.max_same_url.fetch_max(*n, Ordering::SeqCst);
        let total = self.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_total.fetch_max(total, Ordering::SeqCst);
    }

    fn leave(&self, url: &str) {
        let mut active = self.active.lock().unwrap();
        if let Some(n) = active.get_mut(url) {
            *n -= 1;
        }
        self.active_total.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryTransport for MemoryTransport {
    async fn get(
        &self,
        url: &str,
        _timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> Result<Bytes> {
        self.gets.lock().unwrap().push(url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(BazaarError::Network {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        self.enter(url);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.leave(url);

        let body = self.routes.lock().unwrap().get(url).cloned();
        match body {
            Some(body) => {
                if let Some(callback) = progress {
                    let len = body.len() as u64;
                    callback(DownloadProgress::new(len, len));
                }
                Ok(body)
            }
            None => Err(BazaarError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<()> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        Ok(())
    }

    async fn probe(&self, _url: &str, _timeout: Duration) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Build a zip archive from `(path, contents)` pairs; paths ending in `/`
/// become directory entries.
pub(crate) fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
