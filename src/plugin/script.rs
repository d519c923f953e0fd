//! Guest call construction
//!
//! The host talks to a plugin by building small source snippets. Arguments
//! are substituted as JSON literals, which are valid JavaScript expressions,
//! so only primitive-shaped values (strings, numbers, booleans, plain
//! objects/arrays) ever reach guest code this way.

use serde::Deserialize;
use serde_json::Value;

/// Global holding the loaded plugin module (after `.default` unwrapping)
pub const PLUGIN_GLOBAL: &str = "__plugin";

/// Longest argument preview written to the log
pub const ARGS_PREVIEW_LIMIT: usize = 200;

/// Plugin entry points the host knows how to call and normalize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Filters,
    PopularNovels,
    SearchNovels,
    ParseNovel,
    ParsePage,
    ParseChapter,
    /// Optional: `resolveUrl(path, isNovel)`
    ResolveUrl,
    /// Optional: `fetchImage(ref)`
    FetchImage,
}

impl EntryPoint {
    /// Guest-side name, also used as the evaluation label
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Filters => "filters",
            EntryPoint::PopularNovels => "popularNovels",
            EntryPoint::SearchNovels => "searchNovels",
            EntryPoint::ParseNovel => "parseNovel",
            EntryPoint::ParsePage => "parsePage",
            EntryPoint::ParseChapter => "parseChapter",
            EntryPoint::ResolveUrl => "resolveUrl",
            EntryPoint::FetchImage => "fetchImage",
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-encode a string as a JavaScript string literal
pub fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Register the plugin source as a module named after the plugin id
pub fn wrap_plugin(plugin_id: &str, source: &str) -> String {
    format!(
        "__defineModule({}, function (module, exports) {{\n{}\n}});",
        js_string(plugin_id),
        source
    )
}

/// Optional entry points a plugin implements, detected once after loading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Capabilities {
    pub parse_page: bool,
    pub resolve_url: bool,
    pub fetch_image: bool,
}

const OPTIONAL_ENTRY_POINTS: [EntryPoint; 3] = [EntryPoint::ParsePage, EntryPoint::ResolveUrl, EntryPoint::FetchImage];

/// Load the plugin module into [`PLUGIN_GLOBAL`]; completes with the JSON
/// form of its [`Capabilities`]
pub fn init_snippet(plugin_id: &str) -> String {
    let checks = OPTIONAL_ENTRY_POINTS
        .iter()
        .map(|entry| format!("{name}: typeof {g}.{name} === \"function\"", name = entry.as_str(), g = PLUGIN_GLOBAL))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "var {g} = require({id});\n\
         if ({g} && {g}.default) {{ {g} = {g}.default; }}\n\
         JSON.stringify({{ {checks} }});",
        g = PLUGIN_GLOBAL,
        id = js_string(plugin_id),
        checks = checks,
    )
}

/// `JSON.stringify(__normalizePluginResult("<fn>", __resolve(__plugin.<fn>(<args>))))`
///
/// `filters` is a property, not a function; it is read once, ignores `args`
/// and falls back to `{}` when the plugin has none.
pub fn call_expression(entry: EntryPoint, args: &[Value]) -> String {
    if entry == EntryPoint::Filters {
        return format!(
            "JSON.stringify(__normalizePluginResult(\"filters\", ({g} && {g}.filters) || {{}}))",
            g = PLUGIN_GLOBAL
        );
    }

    let args = args.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
    format!(
        "JSON.stringify(__normalizePluginResult(\"{name}\", __resolve({g}.{name}({args}))))",
        name = entry.as_str(),
        g = PLUGIN_GLOBAL,
        args = args,
    )
}

/// Argument list for diagnostics, cut to [`ARGS_PREVIEW_LIMIT`] characters
pub fn args_preview(args: &[Value]) -> String {
    let full = Value::Array(args.to_vec()).to_string();
    if full.chars().count() <= ARGS_PREVIEW_LIMIT {
        return full;
    }
    let mut preview: String = full.chars().take(ARGS_PREVIEW_LIMIT).collect();
    preview.push_str("...");
    preview
}
