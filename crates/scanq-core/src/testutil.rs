//! Shared test helpers: deterministic clock, in-memory stores and a
//! scriptable remote service.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::clock::Clock;
use crate::credentials::{CredentialStore, Credentials};
use crate::digest::ContentDigest;
use crate::error::Result;
use crate::observer::{Event, Observer};
use crate::remote::{RemoteError, ReportRef, ScanService, UploadBody};
use crate::store::BlobStore;

/// A clock that only moves when the test says so.
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for std::sync::Arc<ManualClock> {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Blob store backed by a HashMap.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().unwrap().remove(key);
    }
}

impl BlobStore for std::sync::Arc<MemoryBlobStore> {
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.insert(key, data);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }
}

/// Observer that records every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Observer for std::sync::Arc<RecordingObserver> {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Credential store whose contents tests can swap at runtime.
pub struct TestCredentials {
    current: Mutex<Option<Credentials>>,
}

impl TestCredentials {
    pub fn with(creds: Option<Credentials>) -> Self {
        Self {
            current: Mutex::new(creds),
        }
    }

    pub fn set(&self, creds: Option<Credentials>) {
        *self.current.lock().unwrap() = creds;
    }
}

impl CredentialStore for std::sync::Arc<TestCredentials> {
    fn get(&self) -> Option<Credentials> {
        self.current.lock().unwrap().clone()
    }
}

pub fn test_credentials() -> Credentials {
    Credentials {
        api_key: "test-key".to_string(),
        premium: false,
    }
}

/// Remote service that replays scripted responses and panics on any
/// call the test did not script.
#[derive(Default)]
pub struct ScriptedService {
    lookups: Mutex<VecDeque<std::result::Result<Option<ReportRef>, RemoteError>>>,
    uploads: Mutex<VecDeque<std::result::Result<ReportRef, RemoteError>>>,
    upload_urls: Mutex<VecDeque<std::result::Result<String, RemoteError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_lookup(&self, result: std::result::Result<Option<ReportRef>, RemoteError>) {
        self.lookups.lock().unwrap().push_back(result);
    }

    pub fn script_upload(&self, result: std::result::Result<ReportRef, RemoteError>) {
        self.uploads.lock().unwrap().push_back(result);
    }

    pub fn script_upload_url(&self, result: std::result::Result<String, RemoteError>) {
        self.upload_urls.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ScanService for std::sync::Arc<ScriptedService> {
    fn lookup(
        &self,
        _creds: &Credentials,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<ReportRef>, RemoteError> {
        self.record(format!("lookup {digest}"));
        self.lookups
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted lookup call"))
    }

    fn upload(
        &self,
        _creds: &Credentials,
        mut body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError> {
        let len = body.len();
        self.record(format!("upload {len}"));
        if let Some(hook) = body.on_chunk.as_mut() {
            hook(len / 2);
            hook(len);
        }
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted upload call"))
    }

    fn upload_url(&self, _creds: &Credentials) -> std::result::Result<String, RemoteError> {
        self.record("upload-url".to_string());
        self.upload_urls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted upload_url call"))
    }

    fn upload_to(
        &self,
        _creds: &Credentials,
        url: &str,
        mut body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError> {
        let len = body.len();
        self.record(format!("upload-to {url} {len}"));
        if let Some(hook) = body.on_chunk.as_mut() {
            hook(len / 2);
            hook(len);
        }
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted upload_to call"))
    }
}
