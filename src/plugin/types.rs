//! Plugin type definitions
//!
//! The plugin descriptor plus the normalized payload shapes that cross the
//! guest→host boundary. Payloads are produced by the guest-side normalizer, so
//! every field here is already JSON-safe; optional fields default to `None`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{NovelError, Result};

/// Unique identifier for a plugin
pub type PluginId = String;

/// Plugin descriptor
///
/// Identity and source text of one source plugin. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Opaque plugin id, also the `require()` name of the wrapped module
    pub id: PluginId,

    /// Display name
    pub name: String,

    /// Language tag (e.g. "en")
    pub lang: String,

    /// Site / base URL
    pub site: String,

    /// Plugin module body (compiled CommonJS)
    #[serde(skip_serializing)]
    pub source: String,
}

impl PluginDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        lang: impl Into<String>,
        site: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self> {
        let descriptor = Self {
            id: id.into(),
            name: name.into(),
            lang: lang.into(),
            site: site.into(),
            source: source.into(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Read a plugin script from disk; the id defaults to the file stem
    pub fn from_file(path: &Path, id: Option<String>, name: Option<String>, lang: &str, site: &str) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;

        let id = match id {
            Some(id) => id,
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
                .ok_or_else(|| NovelError::InvalidPlugin(format!("cannot derive id from {}", path.display())))?,
        };
        let name = name.unwrap_or_else(|| id.clone());

        Self::new(id, name, lang, site, source)
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(NovelError::InvalidPlugin("plugin id cannot be empty".to_string()));
        }
        if self.source.trim().is_empty() {
            return Err(NovelError::InvalidPlugin(format!("plugin {} has no source", self.id)));
        }
        Ok(())
    }
}

/// Novel entry from a `popularNovels` / `searchNovels` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelSummary {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub cover: Option<String>,
}

/// Chapter entry from a `parseNovel` / `parsePage` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub release_time: Option<String>,
    #[serde(default)]
    pub chapter_number: Option<f64>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub scanlator: Option<String>,
}

/// `parseNovel` payload
///
/// `name` and `path` may be missing; the adapter falls back to the novel it
/// asked about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NovelDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub genres: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub chapters: Option<Vec<ChapterSummary>>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// `parsePage` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterPage {
    #[serde(default)]
    pub chapters: Vec<ChapterSummary>,
}
