//! Catalogue source interface
//!
//! This module defines the host-facing contract that library, browse and
//! update collaborators consume, together with the canonical catalogue model.
//!
//! A catalogue source provides:
//! - Popular / latest listings and search, page by page
//! - Novel details and the chapter list for a novel
//! - Chapter text
//! - The filter list used to refine listings
//! - Optionally, browser URLs for novels and chapters

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use super::filters::FilterList;
use crate::core::error::Result;

/// Catalogue source trait
///
/// Implementations may be called concurrently; any serialization they need
/// is internal.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// Source id
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Language tag
    fn lang(&self) -> &str;

    /// Site base URL
    fn base_url(&self) -> &str;

    /// Filters the source understands, with their default values
    async fn get_filter_list(&self) -> Result<FilterList>;

    /// Popular novels (1-indexed page)
    async fn get_popular_novels(&self, page: u32) -> Result<NovelsPage>;

    /// Search novels by keyword with the given filter values
    async fn get_search_novels(&self, page: u32, query: &str, filters: &FilterList) -> Result<NovelsPage>;

    /// Recently updated novels
    async fn get_latest_updates(&self, page: u32) -> Result<NovelsPage>;

    /// Fill in details for a novel; fields the plugin omits keep their input values
    async fn get_novel_details(&self, novel: &Novel) -> Result<Novel>;

    /// All chapters of a novel
    async fn get_chapter_list(&self, novel: &Novel) -> Result<Vec<NovelChapter>>;

    /// Chapter body (usually HTML)
    async fn get_chapter_text(&self, chapter: &NovelChapter) -> Result<String>;

    /// Browser URL of a novel page, when the source can build one
    async fn get_novel_web_url(&self, _novel_path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Browser URL of a chapter page, when the source can build one
    async fn get_chapter_web_url(&self, _chapter_path: &str, _novel_path: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }
}

/// One page of novels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NovelsPage {
    pub novels: Vec<Novel>,
    pub has_next_page: bool,
}

/// Publication status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NovelStatus {
    #[default]
    Unknown,
    Ongoing,
    Completed,
    Licensed,
    PublishingFinished,
    Cancelled,
    OnHiatus,
}

impl NovelStatus {
    /// Map a plugin status string; case-insensitive, unknown for anything unrecognized
    pub fn from_plugin(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "ongoing" => NovelStatus::Ongoing,
            "completed" | "complete" => NovelStatus::Completed,
            "licensed" => NovelStatus::Licensed,
            "publishing finished" | "publishing_finished" | "publishingfinished" => NovelStatus::PublishingFinished,
            "cancelled" | "canceled" | "dropped" => NovelStatus::Cancelled,
            "on hiatus" | "on_hiatus" | "hiatus" => NovelStatus::OnHiatus,
            _ => NovelStatus::Unknown,
        }
    }
}

/// Novel in the catalogue model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Novel {
    /// Plugin-relative path
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub status: NovelStatus,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// True once details have been fetched
    #[serde(default)]
    pub initialized: bool,
}

impl Novel {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Chapter in the catalogue model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovelChapter {
    /// Plugin-relative path
    pub url: String,
    pub name: String,
    /// Milliseconds since the Unix epoch, 0 when unknown
    pub date_upload: i64,
    /// -1 when the plugin does not number its chapters
    pub chapter_number: f32,
    #[serde(default)]
    pub scanlator: Option<String>,
}

impl NovelChapter {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            date_upload: 0,
            chapter_number: -1.0,
            scanlator: None,
        }
    }
}

/// Parse a release time: ISO-8601 instant first, then a bare date at UTC midnight.
/// Anything else maps to 0.
pub fn parse_release_time(value: Option<&str>) -> i64 {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return 0;
    };

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return instant.timestamp_millis();
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
        .unwrap_or(0)
}
