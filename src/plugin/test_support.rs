//! Test doubles for the native bridge

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;

use super::bridge::{ConsoleLevel, NativeApi, NETWORK_FAILURE};
use super::storage::{KeyValueStore, MemoryStore};

/// Bridge that serves canned pages and records every call in order
#[derive(Default)]
pub struct RecordingApi {
    pages: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<Option<String>>>,
    store: MemoryStore,
    fetch_delay: Option<Duration>,
}

impl RecordingApi {
    /// Sleep inside every fetch so overlapping callers would interleave
    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn serve(&self, url: &str, body: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), body.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Request options JSON of each fetch, in call order
    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NativeApi for RecordingApi {
    fn fetch(&self, url: &str, options_json: Option<&str>) -> Result<String> {
        self.record(format!("fetch:{url}"));
        self.requests.lock().unwrap().push(options_json.map(str::to_string));
        if let Some(delay) = self.fetch_delay {
            std::thread::sleep(delay);
        }
        if url.contains("unreachable") {
            return Err(anyhow!("{NETWORK_FAILURE}request to {url} failed: connection refused"));
        }
        let body = self.pages.lock().unwrap().get(url).cloned();
        let (status, body) = match body {
            Some(body) => (200, body),
            None => (404, String::new()),
        };
        Ok(json!({ "status": status, "url": url, "headers": {}, "body": body }).to_string())
    }

    fn storage_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key)?)
    }

    fn storage_set(&self, key: &str, value: &str) -> Result<()> {
        self.record(format!("storage_set:{key}"));
        Ok(self.store.set(key, value)?)
    }

    fn storage_remove(&self, key: &str) -> Result<()> {
        Ok(self.store.remove(key)?)
    }

    fn storage_clear(&self) -> Result<()> {
        Ok(self.store.clear()?)
    }

    fn storage_keys(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.store.keys()?)?)
    }

    fn console(&self, _plugin_id: &str, level: ConsoleLevel, message: &str) {
        self.record(format!("console:{level:?}:{message}"));
    }
}
