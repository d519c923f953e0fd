//! Native bridge
//!
//! Host primitives that guest scripts reach through the `__native` object:
//! HTTP fetch, key/value storage, URL resolution, CSS selection and console
//! output. All of them are synchronous from the engine's point of view; the
//! worker thread blocks while the host does the I/O.
//!
//! The bridge is exposed to the engine as a set of ops in one `Extension`.
//! Each runtime instance stores a [`BridgeState`] and its own [`DomStore`] in
//! its `OpState`; the DOM ops never leave the engine thread.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use deno_core::error::AnyError;
use deno_core::{op2, Extension, Op, OpState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use url::Url;

use super::dom::{Axis, DomStore, Property};
use super::html;
use super::storage::KeyValueStore;
use crate::core::config::HttpConfig;

/// Marks bridge transport failures; a guest exception carrying it surfaces as
/// `NovelError::NetworkError`.
pub const NETWORK_FAILURE: &str = "NetworkError: ";

/// Console severity forwarded from guest `console.*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

impl ConsoleLevel {
    fn parse(level: &str) -> Self {
        match level {
            "warn" => ConsoleLevel::Warn,
            "error" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }
}

/// Host-implemented primitives available to guest code
///
/// Only fetch and storage are required; URL handling, selection and console
/// output have host defaults.
pub trait NativeApi: Send + Sync {
    /// Perform one HTTP request. `options_json` is
    /// `{method, headers, bodyType, body, formEntries, referrer, origin}`;
    /// the result is `{status, url, headers, body}` as JSON.
    fn fetch(&self, url: &str, options_json: Option<&str>) -> Result<String>;

    fn storage_get(&self, key: &str) -> Result<Option<String>>;

    fn storage_set(&self, key: &str, value: &str) -> Result<()>;

    fn storage_remove(&self, key: &str) -> Result<()>;

    fn storage_clear(&self) -> Result<()>;

    /// JSON array of stored keys
    fn storage_keys(&self) -> Result<String>;

    fn resolve_url(&self, url: &str, base: Option<&str>) -> String {
        resolve_url(url, base)
    }

    fn get_pathname(&self, url: &str) -> String {
        Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default()
    }

    /// JSON array of `{html, outerHtml, text, attrs, tagName}`
    fn select(&self, html: &str, selector: &str) -> Result<String> {
        html::select_json(html, selector)
    }

    fn console(&self, plugin_id: &str, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Log => info!(plugin = %plugin_id, "{}", message),
            ConsoleLevel::Warn => warn!(plugin = %plugin_id, "{}", message),
            ConsoleLevel::Error => error!(plugin = %plugin_id, "{}", message),
        }
    }
}

/// Resolve `url` absolutely, or against `base`; unresolvable input is returned as-is
pub fn resolve_url(url: &str, base: Option<&str>) -> String {
    if let Ok(absolute) = Url::parse(url) {
        return absolute.to_string();
    }

    base.and_then(|b| Url::parse(b).ok())
        .and_then(|b| b.join(url).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Request envelope produced by `@libs/fetch`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: Map<String, Value>,
    pub body_type: Option<String>,
    pub body: Option<String>,
    pub form_entries: Option<Vec<FormEntry>>,
    pub referrer: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormEntry {
    pub key: String,
    pub value: String,
}

/// Response envelope returned to `@libs/fetch`
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub headers: Map<String, Value>,
    pub body: String,
}

/// Default bridge: reqwest for HTTP, a [`KeyValueStore`] for storage
pub struct HostNativeApi {
    http: HttpConfig,
    store: Arc<dyn KeyValueStore>,
    client: OnceLock<reqwest::blocking::Client>,
}

impl HostNativeApi {
    pub fn new(http: HttpConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            http,
            store,
            client: OnceLock::new(),
        }
    }

    // Built on first use, which is always the engine worker thread.
    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout))
            .connect_timeout(Duration::from_secs(self.http.connect_timeout))
            .user_agent(self.http.user_agent.clone())
            .danger_accept_invalid_certs(self.http.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl NativeApi for HostNativeApi {
    fn fetch(&self, url: &str, options_json: Option<&str>) -> Result<String> {
        let options: FetchOptions = match options_json {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).context("Invalid fetch options")?,
            _ => FetchOptions::default(),
        };

        let method_name = options.method.as_deref().unwrap_or("GET").to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| anyhow!("Unsupported HTTP method: {}", method_name))?;

        debug!(method = %method, url = %url, "Bridge fetch");

        let mut request = self.client()?.request(method, url);

        let mut has_referer = false;
        let mut has_origin = false;
        for (name, value) in &options.headers {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            has_referer |= name.eq_ignore_ascii_case("referer");
            has_origin |= name.eq_ignore_ascii_case("origin");
            request = request.header(name.as_str(), value);
        }
        if let (Some(referrer), false) = (&options.referrer, has_referer) {
            request = request.header(reqwest::header::REFERER, referrer.as_str());
        }
        if let (Some(origin), false) = (&options.origin, has_origin) {
            request = request.header(reqwest::header::ORIGIN, origin.as_str());
        }

        request = match options.body_type.as_deref() {
            Some("form") => {
                let pairs: Vec<(String, String)> = options
                    .form_entries
                    .unwrap_or_default()
                    .into_iter()
                    .map(|entry| (entry.key, entry.value))
                    .collect();
                request.form(&pairs)
            }
            Some("text") => request.body(options.body.unwrap_or_default()),
            _ => request,
        };

        let response = request
            .send()
            .map_err(|e| anyhow!("{NETWORK_FAILURE}request to {url} failed: {e}"))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
        let body = response
            .text()
            .map_err(|e| anyhow!("{NETWORK_FAILURE}failed to read body from {url}: {e}"))?;

        debug!(status, url = %final_url, body_len = body.len(), "Bridge fetch completed");

        Ok(serde_json::to_string(&FetchResponse {
            status,
            url: final_url,
            headers,
            body,
        })?)
    }

    fn storage_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key)?)
    }

    fn storage_set(&self, key: &str, value: &str) -> Result<()> {
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
}

/// Per-runtime op state
pub struct BridgeState {
    pub plugin_id: String,
    pub api: Arc<dyn NativeApi>,
}

#[op2]
#[string]
fn op_novel_fetch(
    state: &mut OpState,
    #[string] url: String,
    #[string] options: Option<String>,
) -> Result<String, AnyError> {
    state.borrow::<BridgeState>().api.fetch(&url, options.as_deref())
}

#[op2]
#[string]
fn op_novel_storage_get(state: &mut OpState, #[string] key: String) -> Result<Option<String>, AnyError> {
    state.borrow::<BridgeState>().api.storage_get(&key)
}

#[op2(fast)]
fn op_novel_storage_set(state: &mut OpState, #[string] key: String, #[string] value: String) -> Result<(), AnyError> {
    state.borrow::<BridgeState>().api.storage_set(&key, &value)
}

#[op2(fast)]
fn op_novel_storage_remove(state: &mut OpState, #[string] key: String) -> Result<(), AnyError> {
    state.borrow::<BridgeState>().api.storage_remove(&key)
}

#[op2(fast)]
fn op_novel_storage_clear(state: &mut OpState) -> Result<(), AnyError> {
    state.borrow::<BridgeState>().api.storage_clear()
}

#[op2]
#[string]
fn op_novel_storage_keys(state: &mut OpState) -> Result<String, AnyError> {
    state.borrow::<BridgeState>().api.storage_keys()
}

#[op2]
#[string]
fn op_novel_resolve_url(state: &mut OpState, #[string] url: String, #[string] base: Option<String>) -> String {
    state.borrow::<BridgeState>().api.resolve_url(&url, base.as_deref())
}

#[op2]
#[string]
fn op_novel_pathname(state: &mut OpState, #[string] url: String) -> String {
    state.borrow::<BridgeState>().api.get_pathname(&url)
}

#[op2]
#[string]
fn op_novel_select(state: &mut OpState, #[string] html: String, #[string] selector: String) -> Result<String, AnyError> {
    state.borrow::<BridgeState>().api.select(&html, &selector)
}

#[op2(fast)]
fn op_novel_console(state: &mut OpState, #[string] level: String, #[string] message: String) {
    let bridge = state.borrow::<BridgeState>();
    bridge.api.console(&bridge.plugin_id, ConsoleLevel::parse(&level), &message);
}

#[op2(fast)]
fn op_novel_dom_load(state: &mut OpState, #[string] html: String) -> u32 {
    state.borrow_mut::<DomStore>().load(&html)
}

#[op2]
#[serde]
fn op_novel_dom_query(
    state: &mut OpState,
    handle: u32,
    #[string] axis: String,
    #[string] selector: Option<String>,
) -> Result<Vec<u32>, AnyError> {
    let axis = axis.parse::<Axis>()?;
    state.borrow_mut::<DomStore>().query(handle, axis, selector.as_deref())
}

#[op2]
#[string]
fn op_novel_dom_read(
    state: &mut OpState,
    handle: u32,
    #[string] property: String,
    #[string] name: Option<String>,
) -> Result<Option<String>, AnyError> {
    let property = property.parse::<Property>()?;
    Ok(state.borrow::<DomStore>().read(handle, property, name.as_deref()))
}

#[op2(fast)]
fn op_novel_dom_test(
    state: &mut OpState,
    handle: u32,
    #[string] kind: String,
    #[string] selector: String,
) -> Result<bool, AnyError> {
    let store = state.borrow::<DomStore>();
    match kind.as_str() {
        "is" => store.is(handle, &selector),
        "has" => store.has(handle, &selector),
        other => Err(anyhow!("Unknown DOM test: {}", other)),
    }
}

#[op2]
fn op_novel_dom_mutate(
    state: &mut OpState,
    handle: u32,
    #[string] action: String,
    #[string] content: Option<String>,
) -> Result<(), AnyError> {
    let store = state.borrow_mut::<DomStore>();
    match action.as_str() {
        "remove" => store.remove(handle),
        "replaceWith" => store.replace_with(handle, content.as_deref().unwrap_or_default()),
        other => return Err(anyhow!("Unknown DOM mutation: {}", other)),
    }
    Ok(())
}

/// Extension registering every bridge op
pub fn bridge_extension() -> Extension {
    Extension {
        name: "novel_bridge",
        ops: Cow::Borrowed(&[
            op_novel_fetch::DECL,
            op_novel_storage_get::DECL,
            op_novel_storage_set::DECL,
            op_novel_storage_remove::DECL,
            op_novel_storage_clear::DECL,
            op_novel_storage_keys::DECL,
            op_novel_resolve_url::DECL,
            op_novel_pathname::DECL,
            op_novel_select::DECL,
            op_novel_console::DECL,
            op_novel_dom_load::DECL,
            op_novel_dom_query::DECL,
            op_novel_dom_read::DECL,
            op_novel_dom_test::DECL,
            op_novel_dom_mutate::DECL,
        ]),
        ..Default::default()
    }
}
