//! Plugin-served images
//!
//! Some sources proxy covers or inline chapter images through the plugin's
//! optional `fetchImage`. The plugin answers with a data URL, or with an object
//! carrying base64 bytes (`{cacheKey, dataUrl | base64, mimeType}`).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::error::Result;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Decoded image bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePayload {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub cache_key: Option<String>,
}

impl ImagePayload {
    /// Decode a normalized `fetchImage` result. Unusable payloads yield `None`.
    pub fn from_plugin(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Self::from_data_url(raw.trim()),
            Value::Object(map) => {
                let cache_key = field(map, &["cacheKey", "key"]).map(str::to_string);

                if let Some(decoded) = field(map, &["dataUrl", "data"]).and_then(Self::from_data_url) {
                    return Some(Self {
                        cache_key: cache_key.or(decoded.cache_key.clone()),
                        ..decoded
                    });
                }

                let encoded = field(map, &["base64", "bytesBase64", "bodyBase64"])?;
                let bytes = STANDARD.decode(encoded).ok()?;
                Some(Self {
                    bytes,
                    mime_type: field(map, &["mimeType", "contentType"])
                        .unwrap_or(DEFAULT_MIME_TYPE)
                        .to_string(),
                    cache_key,
                })
            }
            _ => None,
        }
    }

    /// Decode `data:[<mime>][;base64],<body>`
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let prefix = data_url.get(..5)?;
        if !prefix.eq_ignore_ascii_case("data:") {
            return None;
        }
        let (metadata, body) = data_url[5..].split_once(',')?;
        if metadata.is_empty() {
            return None;
        }

        let mime_type = metadata
            .split(';')
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();

        let bytes = if metadata.to_ascii_lowercase().contains(";base64") {
            STANDARD.decode(body).ok()?
        } else {
            urlencoding::decode(&body.replace('+', " ")).ok()?.into_owned().into_bytes()
        };

        Some(Self {
            bytes,
            mime_type,
            cache_key: None,
        })
    }
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| map.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Source able to serve images through its plugin
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// `None` when the plugin has no `fetchImage` or returned nothing usable
    async fn fetch_image(&self, image_ref: &str) -> Result<Option<ImagePayload>>;
}
