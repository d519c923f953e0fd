//! JavaScript catalogue source
//!
//! Adapts one plugin script to [`CatalogueSource`]. Every call takes the
//! adapter mutex for its whole duration, so guest execution for one plugin is
//! strictly sequential even when the host calls concurrently. The runtime
//! instance is created on first use and discarded if its bootstrap fails.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::bridge::{HostNativeApi, NativeApi};
use super::catalogue::{parse_release_time, CatalogueSource, Novel, NovelChapter, NovelStatus, NovelsPage};
use super::filters::FilterList;
use super::image::{ImagePayload, ImageSource};
use super::js_runtime::{JsValue, NovelJsRuntime};
use super::script::{args_preview, call_expression, init_snippet, wrap_plugin, Capabilities, EntryPoint};
use super::storage::open_store;
use super::types::{ChapterPage, ChapterSummary, NovelDetails, NovelSummary, PluginDescriptor};
use crate::core::config::{Config, RuntimeConfig};
use crate::core::error::{NovelError, Result};

#[derive(Default)]
struct SourceState {
    runtime: Option<NovelJsRuntime>,
    capabilities: Capabilities,
    filters: Option<FilterList>,
    closed: bool,
}

/// Catalogue source backed by a JavaScript plugin
pub struct NovelJsSource {
    descriptor: PluginDescriptor,
    api: Arc<dyn NativeApi>,
    runtime_config: RuntimeConfig,
    state: Mutex<SourceState>,
}

impl NovelJsSource {
    pub fn new(descriptor: PluginDescriptor, api: Arc<dyn NativeApi>, runtime_config: RuntimeConfig) -> Self {
        Self {
            descriptor,
            api,
            runtime_config,
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Source wired to the host bridge (HTTP client plus the configured store)
    pub fn from_config(descriptor: PluginDescriptor, config: &Config) -> Result<Self> {
        let store = open_store(&config.storage, &descriptor.id)?;
        let api = Arc::new(HostNativeApi::new(config.http.clone(), store));
        Ok(Self::new(descriptor, api, config.runtime.clone()))
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// Dispose the runtime instance. Later calls fail with `RuntimeClosed`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(runtime) = state.runtime.take() {
            runtime.close().await;
        }
    }

    async fn runtime<'a>(&self, state: &'a mut SourceState) -> Result<&'a NovelJsRuntime> {
        if state.closed {
            return Err(NovelError::RuntimeClosed(self.descriptor.id.clone()));
        }

        if state.runtime.is_none() {
            let (runtime, capabilities) = self.load().await.map_err(|e| {
                error!(plugin = %self.descriptor.id, error = %e, "Failed to load plugin");
                e
            })?;
            state.capabilities = capabilities;
            state.runtime = Some(runtime);
        }

        state
            .runtime
            .as_ref()
            .ok_or_else(|| NovelError::RuntimeClosed(self.descriptor.id.clone()))
    }

    /// Start a runtime, evaluate the plugin module and detect its optional entry points
    async fn load(&self) -> Result<(NovelJsRuntime, Capabilities)> {
        let id = &self.descriptor.id;
        let runtime = NovelJsRuntime::start(id, self.api.clone(), &self.runtime_config).await?;

        let loaded = async {
            runtime
                .evaluate(wrap_plugin(id, &self.descriptor.source), "novel:plugin")
                .await?;
            runtime.evaluate(init_snippet(id), "novel:init").await
        }
        .await;

        match loaded {
            Ok(reported) => {
                let capabilities: Capabilities = decode(reported).ok().flatten().unwrap_or_default();
                info!(
                    plugin = %id,
                    parse_page = capabilities.parse_page,
                    resolve_url = capabilities.resolve_url,
                    fetch_image = capabilities.fetch_image,
                    "Plugin loaded"
                );
                Ok((runtime, capabilities))
            }
            Err(e) => {
                runtime.close().await;
                Err(match e {
                    NovelError::ModuleNotFound(_) => e,
                    other => NovelError::Bootstrap {
                        plugin_id: id.clone(),
                        message: other.to_string(),
                        source: Some(other.into()),
                    },
                })
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, entry: EntryPoint, args: &[Value]) -> Result<Option<T>> {
        let mut state = self.state.lock().await;
        self.call_locked(&mut state, entry, args).await
    }

    async fn call_locked<T: DeserializeOwned>(
        &self,
        state: &mut SourceState,
        entry: EntryPoint,
        args: &[Value],
    ) -> Result<Option<T>> {
        let runtime = self.runtime(state).await?;

        debug!(plugin = %self.descriptor.id, function = %entry, "Calling plugin");
        match runtime.evaluate(call_expression(entry, args), entry.as_str()).await {
            Ok(value) => decode(value),
            Err(e) => {
                warn!(
                    plugin = %self.descriptor.id,
                    function = %entry,
                    args = %args_preview(args),
                    error_type = e.error_type(),
                    error = %e,
                    "Plugin call failed"
                );
                Err(e)
            }
        }
    }

    async fn filters_locked(&self, state: &mut SourceState) -> Result<FilterList> {
        if let Some(filters) = &state.filters {
            return Ok(filters.clone());
        }

        let payload: Option<Value> = self.call_locked(state, EntryPoint::Filters, &[]).await?;
        let filters = payload
            .map(|p| FilterList::from_plugin_json(&p))
            .unwrap_or_default();
        state.filters = Some(filters.clone());
        Ok(filters)
    }

    /// Optional entry points are only called when the plugin defines them
    async fn capabilities_locked(&self, state: &mut SourceState) -> Result<Capabilities> {
        self.runtime(state).await?;
        Ok(state.capabilities)
    }

    async fn web_url(&self, path: &str, is_novel: bool) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        if !self.capabilities_locked(&mut state).await?.resolve_url {
            return Ok(None);
        }

        let url: Option<String> = self
            .call_locked(&mut state, EntryPoint::ResolveUrl, &[json!(path), json!(is_novel)])
            .await?;
        Ok(non_blank(url).map(|u| u.trim().to_string()))
    }

    async fn listing(&self, page: u32, latest: bool) -> Result<NovelsPage> {
        let mut state = self.state.lock().await;

        // A plugin whose filters cannot be read can still list novels.
        let filters = match self.filters_locked(&mut state).await {
            Ok(filters) => filters.to_values(),
            Err(NovelError::RuntimeClosed(id)) => return Err(NovelError::RuntimeClosed(id)),
            Err(e) if state.runtime.is_none() => return Err(e),
            Err(_) => json!({}),
        };

        let options = json!({ "showLatestNovels": latest, "filters": filters });
        let novels: Option<Vec<NovelSummary>> = self
            .call_locked(&mut state, EntryPoint::PopularNovels, &[json!(page), options])
            .await?;
        Ok(novels_page(novels.unwrap_or_default()))
    }
}

#[async_trait]
impl CatalogueSource for NovelJsSource {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn lang(&self) -> &str {
        &self.descriptor.lang
    }

    fn base_url(&self) -> &str {
        &self.descriptor.site
    }

    async fn get_filter_list(&self) -> Result<FilterList> {
        let mut state = self.state.lock().await;
        self.filters_locked(&mut state).await
    }

    async fn get_popular_novels(&self, page: u32) -> Result<NovelsPage> {
        self.listing(page, false).await
    }

    async fn get_search_novels(&self, page: u32, query: &str, filters: &FilterList) -> Result<NovelsPage> {
        let novels: Option<Vec<NovelSummary>> = self
            .call(EntryPoint::SearchNovels, &[json!(query), json!(page), filters.to_values()])
            .await?;
        Ok(novels_page(novels.unwrap_or_default()))
    }

    async fn get_latest_updates(&self, page: u32) -> Result<NovelsPage> {
        self.listing(page, true).await
    }

    async fn get_novel_details(&self, novel: &Novel) -> Result<Novel> {
        let details: Option<NovelDetails> = self.call(EntryPoint::ParseNovel, &[json!(novel.url)]).await?;
        Ok(match details {
            Some(details) => merge_details(novel, details),
            None => novel.clone(),
        })
    }

    async fn get_chapter_list(&self, novel: &Novel) -> Result<Vec<NovelChapter>> {
        let mut state = self.state.lock().await;

        let details: Option<NovelDetails> = self
            .call_locked(&mut state, EntryPoint::ParseNovel, &[json!(novel.url)])
            .await?;
        let Some(details) = details else {
            return Ok(Vec::new());
        };

        let mut chapters = details.chapters.unwrap_or_default();
        let total_pages = details.total_pages.unwrap_or(0);

        if chapters.is_empty() && state.capabilities.parse_page && total_pages > 0 {
            debug!(plugin = %self.descriptor.id, total_pages, "Walking chapter pages");
            for page in 1..=total_pages {
                let label = page.to_string();
                let payload: Option<ChapterPage> = self
                    .call_locked(&mut state, EntryPoint::ParsePage, &[json!(novel.url), json!(label)])
                    .await?;
                if let Some(payload) = payload {
                    chapters.extend(payload.chapters.into_iter().map(|mut chapter| {
                        chapter.page.get_or_insert_with(|| label.clone());
                        chapter
                    }));
                }
            }
        }

        Ok(map_chapters(chapters))
    }

    async fn get_chapter_text(&self, chapter: &NovelChapter) -> Result<String> {
        let text: Option<String> = self.call(EntryPoint::ParseChapter, &[json!(chapter.url)]).await?;
        Ok(text.unwrap_or_default())
    }

    async fn get_novel_web_url(&self, novel_path: &str) -> Result<Option<String>> {
        self.web_url(novel_path, true).await
    }

    async fn get_chapter_web_url(&self, chapter_path: &str, _novel_path: Option<&str>) -> Result<Option<String>> {
        self.web_url(chapter_path, false).await
    }
}

#[async_trait]
impl ImageSource for NovelJsSource {
    async fn fetch_image(&self, image_ref: &str) -> Result<Option<ImagePayload>> {
        let mut state = self.state.lock().await;
        if !self.capabilities_locked(&mut state).await?.fetch_image {
            return Ok(None);
        }

        let payload: Option<Value> = self
            .call_locked(&mut state, EntryPoint::FetchImage, &[json!(image_ref)])
            .await?;
        Ok(payload.as_ref().and_then(ImagePayload::from_plugin))
    }
}

/// Blank, `null` and non-string completions mean "no data"
fn decode<T: DeserializeOwned>(value: JsValue) -> Result<Option<T>> {
    let Some(raw) = value.as_str().map(str::trim) else {
        return Ok(None);
    };
    if raw.is_empty() || raw == "null" {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(raw)?))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn novels_page(items: Vec<NovelSummary>) -> NovelsPage {
    let mut seen = HashSet::new();
    let novels: Vec<Novel> = items
        .into_iter()
        .filter(|n| !n.name.trim().is_empty() && !n.path.trim().is_empty())
        .filter(|n| seen.insert(n.path.clone()))
        .map(|n| Novel {
            thumbnail_url: non_blank(n.cover),
            ..Novel::new(n.path, n.name)
        })
        .collect();

    NovelsPage {
        has_next_page: !novels.is_empty(),
        novels,
    }
}

fn merge_details(novel: &Novel, details: NovelDetails) -> Novel {
    Novel {
        url: non_blank(details.path).unwrap_or_else(|| novel.url.clone()),
        title: non_blank(details.name).unwrap_or_else(|| novel.title.clone()),
        author: non_blank(details.author).or_else(|| novel.author.clone()),
        artist: non_blank(details.artist).or_else(|| novel.artist.clone()),
        description: non_blank(details.summary).or_else(|| novel.description.clone()),
        genre: non_blank(details.genres).or_else(|| novel.genre.clone()),
        status: details
            .status
            .as_deref()
            .map(NovelStatus::from_plugin)
            .unwrap_or(novel.status),
        thumbnail_url: non_blank(details.cover).or_else(|| novel.thumbnail_url.clone()),
        initialized: true,
    }
}

fn map_chapters(items: Vec<ChapterSummary>) -> Vec<NovelChapter> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|c| !c.name.trim().is_empty() && !c.path.trim().is_empty())
        .filter(|c| seen.insert(c.path.clone()))
        .map(map_chapter)
        .collect()
}

fn map_chapter(chapter: ChapterSummary) -> NovelChapter {
    // Non-numeric page labels name volumes or branches; keep them as the scanlator.
    let page_label = non_blank(chapter.page).filter(|p| p.trim().parse::<f64>().is_err());

    NovelChapter {
        date_upload: parse_release_time(chapter.release_time.as_deref()),
        chapter_number: chapter.chapter_number.map(|n| n as f32).unwrap_or(-1.0),
        scanlator: non_blank(chapter.scanlator).or(page_label),
        ..NovelChapter::new(chapter.path, chapter.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::test_support::RecordingApi;
    use std::time::Duration;

    const AWAITER: &str = r##"
var __awaiter = (this && this.__awaiter) || function (thisArg, _arguments, P, generator) {
    function adopt(value) { return value instanceof P ? value : new P(function (resolve) { resolve(value); }); }
    return new (P || (P = Promise))(function (resolve, reject) {
        function fulfilled(value) { try { step(generator.next(value)); } catch (e) { reject(e); } }
        function rejected(value) { try { step(generator["throw"](value)); } catch (e) { reject(e); } }
        function step(result) { result.done ? resolve(result.value) : adopt(result.value).then(fulfilled, rejected); }
        step((generator = generator.apply(thisArg, _arguments || [])).next());
    });
};
"##;

    const DEMO_PLUGIN: &str = r##"
Object.defineProperty(exports, "__esModule", { value: true });
const fetch_1 = require("@libs/fetch");
const cheerio_1 = require("cheerio");
const novelStatus_1 = require("@libs/novelStatus");
class DemoPlugin {
    constructor() {
        this.id = "demo";
        this.site = "https://site.test/";
    }
    get filters() {
        console.log("filters read");
        return {
            order: { type: "Picker", label: "Order", value: "popular",
                     options: [{ label: "Popular", value: "popular" }, { label: "New", value: "new" }] },
            broken: { label: "no type" }
        };
    }
    popularNovels(page, options) {
        const url = this.site + "list?page=" + page + "&order=" + options.filters.order.value
            + (options.showLatestNovels ? "&latest=1" : "");
        return fetch_1.fetchText(url).then(function (html) {
            const $ = cheerio_1.load(html);
            return $("li.novel a").map(function (i, el) {
                return { name: $(el).text().trim(), path: $(el).attr("href"), cover: $(el).attr("data-cover") };
            }).get();
        });
    }
    searchNovels(query, page, filters) {
        return Promise.resolve({ novels: [
            { title: query + " " + page, url: "/search/" + encodeURIComponent(query) },
            { title: "dup", url: "/search/" + encodeURIComponent(query) },
            { name: "   ", path: "/blank" }
        ] });
    }
    parseNovel(path) {
        return __awaiter(this, void 0, void 0, function* () {
            const res = yield fetch_1.fetchApi(this.site + path.replace(/^\//, ""));
            const $ = cheerio_1.load(yield res.text());
            return {
                path: path,
                summary: $("#summary").text(),
                genres: $(".genre").map(function (i, el) { return $(el).text(); }).get(),
                status: novelStatus_1.NovelStatus.Completed,
                chapters: $(".chapter").map(function (i, el) {
                    return { name: $(el).text(), path: $(el).attr("href"), releaseTime: $(el).attr("data-date"),
                             chapterNumber: i + 1 };
                }).get(),
                totalPages: 3
            };
        });
    }
    parsePage(path, page) {
        console.log("parsePage " + page);
        return Promise.resolve({ chapters: [] });
    }
    parseChapter(path) {
        if (path === "/missing") return null;
        return fetch_1.fetchText(this.site + path.replace(/^\//, "") + "/a").then((a) =>
            fetch_1.fetchText(this.site + path.replace(/^\//, "") + "/b").then((b) => a + b));
    }
}
exports.default = new DemoPlugin();
"##;

    const NOVEL_PAGE: &str = r##"
<html><body>
  <div id="summary">A long story.</div>
  <span class="genre">Fantasy</span><span class="genre">Drama</span>
  <ul>
    <li><a class="chapter" href="/n/1/c/1" data-date="2024-01-02">Chapter 1</a></li>
    <li><a class="chapter" href="/n/1/c/2" data-date="2024-01-09T12:00:00Z">Chapter 2</a></li>
    <li><a class="chapter" href="/n/1/c/2">Chapter 2 (again)</a></li>
  </ul>
</body></html>
"##;

    fn descriptor(id: &str, source: &str) -> PluginDescriptor {
        PluginDescriptor::new(id, "Demo", "en", "https://site.test/", format!("{AWAITER}{source}")).unwrap()
    }

    fn source_with(api: Arc<RecordingApi>, id: &str, source: &str) -> NovelJsSource {
        NovelJsSource::new(descriptor(id, source), api, RuntimeConfig::default())
    }

    fn demo(api: Arc<RecordingApi>) -> NovelJsSource {
        source_with(api, "demo", DEMO_PLUGIN)
    }

    #[tokio::test]
    async fn test_popular_novels_through_fetch_and_cheerio() {
        let api = RecordingApi::default().into_arc();
        api.serve(
            "https://site.test/list?page=1&order=popular",
            r#"<ul><li class="novel"><a href="/n/1" data-cover="https://img.test/1.jpg"> First </a></li>
               <li class="novel"><a href="/n/2">Second</a></li>
               <li class="novel"><a href="/n/1">First again</a></li>
               <li class="novel"><a>No link</a></li></ul>"#,
        );
        let source = demo(api.clone());

        let page = source.get_popular_novels(1).await.unwrap();
        assert!(page.has_next_page);
        let names: Vec<_> = page.novels.iter().map(|n| (n.title.as_str(), n.url.as_str())).collect();
        assert_eq!(names, vec![("First", "/n/1"), ("Second", "/n/2")]);
        assert_eq!(page.novels[0].thumbnail_url.as_deref(), Some("https://img.test/1.jpg"));
        assert!(page.novels[1].thumbnail_url.is_none());

        let latest = source.get_latest_updates(2).await.unwrap();
        assert!(latest.novels.is_empty());
        assert!(!latest.has_next_page);
        assert!(api
            .calls()
            .contains(&"fetch:https://site.test/list?page=2&order=popular&latest=1".to_string()));
    }

    #[tokio::test]
    async fn test_incomplete_records_are_dropped() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api,
            "records",
            r#"exports.default = {
                popularNovels: function () { return Promise.resolve({ novels: [{ name: "A", path: "/a" }, { title: "B" }] }); },
                parseChapter: function () { return null; }
            };"#,
        );

        let page = source.get_popular_novels(1).await.unwrap();
        assert_eq!(page.novels.len(), 1);
        assert_eq!(page.novels[0], Novel::new("/a", "A"));
    }

    #[tokio::test]
    async fn test_search_uses_aliases_and_dedupes() {
        let api = RecordingApi::default().into_arc();
        let source = demo(api);

        let filters = source.get_filter_list().await.unwrap();
        let page = source.get_search_novels(3, "sword art", &filters).await.unwrap();
        assert_eq!(page.novels.len(), 1);
        assert_eq!(page.novels[0].title, "sword art 3");
        assert_eq!(page.novels[0].url, "/search/sword%20art");
    }

    #[tokio::test]
    async fn test_filters_are_cached() {
        let api = RecordingApi::default().into_arc();
        let source = demo(api.clone());

        let filters = source.get_filter_list().await.unwrap();
        assert_eq!(filters.filters.len(), 1);
        assert_eq!(filters.get("order").unwrap().label, "Order");

        source.get_filter_list().await.unwrap();
        source.get_popular_novels(1).await.unwrap();

        let reads = api.calls().iter().filter(|c| c.as_str() == "console:Log:filters read").count();
        assert_eq!(reads, 1);
    }

    #[tokio::test]
    async fn test_chapter_text() {
        let api = RecordingApi::default().into_arc();
        api.serve("https://site.test/c/1/a", "Hel");
        api.serve("https://site.test/c/1/b", "lo");
        let source = demo(api);

        let text = source.get_chapter_text(&NovelChapter::new("/c/1", "One")).await.unwrap();
        assert_eq!(text, "Hello");

        let missing = source.get_chapter_text(&NovelChapter::new("/missing", "None")).await.unwrap();
        assert_eq!(missing, "");
    }

    const PAGED_FETCH_PLUGIN: &str = r#"
var fetchText = require("@libs/fetch").fetchText;
exports.default = {
    parseNovel: function (path) {
        return fetchText("https://site.test" + path).then(function () {
            return { name: "Paged", path: path, totalPages: 3 };
        });
    },
    parsePage: function (path, page) {
        return fetchText("https://site.test" + path + "/page/" + page).then(function () {
            return { chapters: [{ name: "Ch " + page, path: path + "/" + page }] };
        });
    },
    parseChapter: function (path) {
        return fetchText("https://site.test" + path + "/a").then(function (a) {
            return fetchText("https://site.test" + path + "/b").then(function (b) { return a + b; });
        });
    }
};"#;

    #[tokio::test]
    async fn test_concurrent_calls_are_sequential() {
        let api = RecordingApi::with_fetch_delay(Duration::from_millis(20)).into_arc();
        let source = source_with(api.clone(), "race", PAGED_FETCH_PLUGIN);

        // The chapter walk is four guest calls; the text lookup must not land between them.
        let novel = Novel::new("/p", "Paged");
        let chapter = NovelChapter::new("/c/1", "One");
        let (list, text) = tokio::join!(source.get_chapter_list(&novel), source.get_chapter_text(&chapter));
        assert_eq!(list.unwrap().len(), 3);
        assert_eq!(text.unwrap(), "");

        let fetches: Vec<String> = api.calls().into_iter().filter(|c| c.starts_with("fetch:")).collect();
        assert_eq!(fetches.len(), 6, "{fetches:?}");
        let walk: Vec<bool> = fetches.iter().map(|f| f.starts_with("fetch:https://site.test/p")).collect();
        assert_eq!(walk.iter().filter(|w| **w).count(), 4);
        let switches = walk.windows(2).filter(|pair| pair[0] != pair[1]).count();
        assert_eq!(switches, 1, "interleaved calls: {fetches:?}");
    }

    #[tokio::test]
    async fn test_web_urls_and_images() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api,
            "links",
            r#"exports.default = {
                resolveUrl: function (path, isNovel) {
                    if (path === "/blank") return "  ";
                    return Promise.resolve((isNovel ? "https://site.test/novel" : "https://site.test/read") + path + " ");
                },
                fetchImage: function (ref) {
                    if (ref === "none") return null;
                    if (ref === "obj") return Promise.resolve({ cacheKey: "k1", base64: "aGVsbG8=", mimeType: "image/png" });
                    return Promise.resolve("data:image/gif;base64,aGk=");
                },
                parseChapter: function () { return null; }
            };"#,
        );

        assert_eq!(
            source.get_novel_web_url("/n/1").await.unwrap().as_deref(),
            Some("https://site.test/novel/n/1")
        );
        assert_eq!(
            source.get_chapter_web_url("/c/1", Some("/n/1")).await.unwrap().as_deref(),
            Some("https://site.test/read/c/1")
        );
        assert!(source.get_novel_web_url("/blank").await.unwrap().is_none());

        let image = source.fetch_image("obj").await.unwrap().unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.cache_key.as_deref(), Some("k1"));

        let inline = source.fetch_image("cover").await.unwrap().unwrap();
        assert_eq!(inline.bytes, b"hi");
        assert_eq!(inline.mime_type, "image/gif");

        assert!(source.fetch_image("none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_optional_entry_points_are_not_called() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api,
            "plain",
            r#"exports.default = {
                parseChapter: function () { return null; }
            };"#,
        );

        // Calling an absent function would surface as a Call error

        assert!(source.get_novel_web_url("/n/1").await.unwrap().is_none());
        assert!(source.get_chapter_web_url("/c/1", None).await.unwrap().is_none());
        assert!(source.fetch_image("https://img.test/1.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_total_pages() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api.clone(),
            "pages",
            r#"exports.default = {
                parseNovel: function (path) {
                    if (path === "/huge") return { name: "Huge", path: path, totalPages: 5e9, chapters: [{ name: "1", path: "/huge/1" }] };
                    return { name: "Many", path: path, totalPages: 1e6 };
                },
                parsePage: function (path, page) {
                    console.log("page " + page);
                    return { chapters: [] };
                }
            };"#,
        );

        // A count past u32 must not fail decoding the direct chapters
        let chapters = source.get_chapter_list(&Novel::new("/huge", "Huge")).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].url, "/huge/1");

        // Too many pages to walk: nothing is fetched page by page
        let chapters = source.get_chapter_list(&Novel::new("/many", "Many")).await.unwrap();
        assert!(chapters.is_empty());
        assert!(api.calls().iter().all(|c| !c.starts_with("console:Log:page")));
    }

    #[tokio::test]
    async fn test_details_mapping() {
        let api = RecordingApi::default().into_arc();
        api.serve("https://site.test/n/1", NOVEL_PAGE);
        let source = demo(api);

        let novel = Novel {
            author: Some("Someone".to_string()),
            ..Novel::new("/n/1", "Listed title")
        };
        let details = source.get_novel_details(&novel).await.unwrap();
        assert!(details.initialized);
        assert_eq!(details.title, "Listed title");
        assert_eq!(details.url, "/n/1");
        assert_eq!(details.author.as_deref(), Some("Someone"));
        assert_eq!(details.description.as_deref(), Some("A long story."));
        assert_eq!(details.genre.as_deref(), Some("Fantasy, Drama"));
        assert_eq!(details.status, NovelStatus::Completed);
    }

    #[tokio::test]
    async fn test_direct_chapters_skip_pagination() {
        let api = RecordingApi::default().into_arc();
        api.serve("https://site.test/n/1", NOVEL_PAGE);
        let source = demo(api.clone());

        let chapters = source.get_chapter_list(&Novel::new("/n/1", "Novel")).await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, "Chapter 1");
        assert_eq!(chapters[0].chapter_number, 1.0);
        assert_eq!(chapters[0].date_upload, parse_release_time(Some("2024-01-02")));
        assert_eq!(chapters[1].date_upload, parse_release_time(Some("2024-01-09T12:00:00Z")));
        assert!(api.calls().iter().all(|c| !c.contains("parsePage")));
    }

    #[tokio::test]
    async fn test_paginated_chapter_fallback() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api.clone(),
            "paged",
            r#"exports.default = {
                parseNovel: function (path) { return Promise.resolve({ name: "Paged", path: path, totalPages: 2 }); },
                parsePage: function (path, page) {
                    console.log("page " + page + " " + typeof page);
                    var volume = page === "1" ? "1" : "Side stories";
                    return new Promise(function (resolve) {
                        setTimeout(function () {
                            resolve({ chapters: [
                                { title: "Ch " + page, href: path + "/" + page, number: Number(page), page: volume },
                                { chapterName: "Dup", link: path + "/1" }
                            ] });
                        }, 10);
                    });
                }
            };"#,
        );

        let chapters = source.get_chapter_list(&Novel::new("/p", "Paged")).await.unwrap();
        let urls: Vec<_> = chapters.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["/p/1", "/p/2"]);
        assert_eq!(chapters[1].chapter_number, 2.0);
        assert!(chapters[0].scanlator.is_none());
        assert_eq!(chapters[1].scanlator.as_deref(), Some("Side stories"));
        assert_eq!(
            api.calls().iter().filter(|c| c.starts_with("console:Log:page")).cloned().collect::<Vec<_>>(),
            vec!["console:Log:page 1 string".to_string(), "console:Log:page 2 string".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unsettled_call_is_distinct_and_recoverable() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(
            api,
            "stuck",
            r#"exports.default = {
                parseChapter: function (path) {
                    if (path === "/stuck") return new Promise(function () {});
                    if (path === "/throws") throw new Error("parse failure");
                    return Promise.resolve("text");
                }
            };"#,
        );

        let err = source.get_chapter_text(&NovelChapter::new("/stuck", "x")).await.unwrap_err();
        assert!(matches!(err, NovelError::UnsettledAsync { ref function, .. } if function == "parseChapter"));

        let err = source.get_chapter_text(&NovelChapter::new("/throws", "x")).await.unwrap_err();
        assert!(matches!(err, NovelError::Call { .. }));

        let text = source.get_chapter_text(&NovelChapter::new("/ok", "x")).await.unwrap();
        assert_eq!(text, "text");
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_retried() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(api, "broken", "exports.default = {;");

        for _ in 0..2 {
            let err = source.get_popular_novels(1).await.unwrap_err();
            assert!(matches!(err, NovelError::Bootstrap { ref plugin_id, .. } if plugin_id == "broken"));
        }
    }

    #[tokio::test]
    async fn test_unsupported_dependency() {
        let api = RecordingApi::default().into_arc();
        let source = source_with(api, "deps", "const _ = require(\"lodash\"); exports.default = {};");

        let err = source.get_chapter_text(&NovelChapter::new("/c", "c")).await.unwrap_err();
        assert!(matches!(err, NovelError::ModuleNotFound(ref name) if name == "lodash"));
    }

    #[tokio::test]
    async fn test_closed_source() {
        let api = RecordingApi::default().into_arc();
        let source = demo(api);

        source.get_filter_list().await.unwrap();
        source.close().await;
        assert!(matches!(source.get_filter_list().await, Err(NovelError::RuntimeClosed(_))));
    }

    #[test]
    fn test_decode_empty_payloads() {
        assert!(decode::<Vec<NovelSummary>>(JsValue::String("null".into())).unwrap().is_none());
        assert!(decode::<String>(JsValue::String("  ".into())).unwrap().is_none());
        assert!(decode::<String>(JsValue::Undefined).unwrap().is_none());
        assert_eq!(decode::<String>(JsValue::String("\"x\"".into())).unwrap().as_deref(), Some("x"));
        assert!(decode::<Vec<NovelSummary>>(JsValue::String("{".into())).is_err());
    }

    #[test]
    fn test_map_chapter_defaults() {
        let chapter = map_chapter(ChapterSummary {
            name: "Prologue".to_string(),
            path: "/c/0".to_string(),
            release_time: Some("yesterday".to_string()),
            chapter_number: None,
            page: Some("3".to_string()),
            scanlator: None,
        });
        assert_eq!(chapter.chapter_number, -1.0);
        assert_eq!(chapter.date_upload, 0);
        assert!(chapter.scanlator.is_none());
    }
}
