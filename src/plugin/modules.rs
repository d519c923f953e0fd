//! Guest module registry
//!
//! Fixed table of `require()`-able modules compiled into the binary. Each
//! source only calls `__defineModule(name, factory)`; factories run lazily on
//! the first `require` and are memoized per runtime instance.

use anyhow::{Context, Result};
use deno_core::JsRuntime;

/// One built-in guest module
#[derive(Debug, Clone, Copy)]
pub struct GuestModule {
    /// `require()` name
    pub name: &'static str,
    /// Script label used for stack traces
    pub file: &'static str,
    pub source: &'static str,
}

macro_rules! guest_module {
    ($name:literal, $file:literal) => {
        GuestModule {
            name: $name,
            file: concat!("novel:modules/", $file),
            source: include_str!(concat!("js/modules/", $file)),
        }
    };
}

const BUILTIN: &[GuestModule] = &[
    guest_module!("@libs/novelStatus", "novel_status.js"),
    guest_module!("@libs/filterInputs", "filter_inputs.js"),
    guest_module!("@libs/defaultCover", "default_cover.js"),
    guest_module!("@libs/isAbsoluteUrl", "is_absolute_url.js"),
    guest_module!("@libs/storage", "storage.js"),
    guest_module!("@libs/fetch", "fetch.js"),
    guest_module!("@/types/constants", "types_constants.js"),
    guest_module!("urlencode", "urlencode.js"),
    guest_module!("dayjs", "dayjs.js"),
    guest_module!("htmlparser2", "htmlparser2.js"),
    guest_module!("cheerio", "cheerio.js"),
    guest_module!("@libs/proseMirrorToHtml", "prose_mirror_to_html.js"),
];

/// Registry of guest modules installed into every runtime instance
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<GuestModule>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModuleRegistry {
    pub fn builtin() -> Self {
        Self {
            modules: BUILTIN.to_vec(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&GuestModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|m| m.name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Evaluate every module definition. Requires the bootstrap to have run.
    pub fn register(&self, runtime: &mut JsRuntime) -> Result<()> {
        for module in &self.modules {
            runtime
                .execute_script(module.file, deno_core::FastString::from_static(module.source))
                .with_context(|| format!("Failed to register guest module {}", module.name))?;
        }
        Ok(())
    }
}
