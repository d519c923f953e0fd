//! Plugin scripting runtime
//!
//! This module provides the JavaScript source plugin implementation:
//! - Native bridge (HTTP, storage, URL, CSS selection) exposed as engine ops
//! - Per-runtime document store answering the guest DOM API by node handle
//! - Runtime instance: one V8 isolate per plugin on its own worker thread
//! - Guest module registry and call-expression construction
//! - Source adapter implementing the catalogue contract

pub mod bridge;
pub mod catalogue;
pub mod dom;
pub mod filters;
pub mod html;
pub mod image;
pub mod js_runtime;
pub mod js_source;
pub mod modules;
pub mod script;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::{ConsoleLevel, HostNativeApi, NativeApi};
pub use catalogue::{CatalogueSource, Novel, NovelChapter, NovelStatus, NovelsPage};
pub use dom::DomStore;
pub use filters::{Filter, FilterList, FilterOption, FilterValue};
pub use image::{ImagePayload, ImageSource};
pub use js_runtime::{JsValue, NovelJsRuntime, RuntimeState};
pub use js_source::NovelJsSource;
pub use modules::{GuestModule, ModuleRegistry};
pub use script::{Capabilities, EntryPoint};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{PluginDescriptor, PluginId};
