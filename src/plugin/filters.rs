//! Source filters
//!
//! Plugins declare filters as a `filters` object keyed by filter id:
//! `{ genre: { type: "Picker", label: "Genre", value: "", options: [{label, value}] } }`.
//! The same keys are sent back inside the listing/search options as
//! `{ genre: { type: "Picker", value: "fantasy" } }`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Selectable option of a picker or checkbox group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
}

/// Filter kind with its current value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "state")]
pub enum FilterValue {
    Text(String),
    Picker { options: Vec<FilterOption>, selected: String },
    #[serde(rename = "Checkbox")]
    CheckboxGroup { options: Vec<FilterOption>, checked: Vec<String> },
    Switch(bool),
    #[serde(rename = "XCheckbox")]
    ExcludableCheckboxGroup {
        options: Vec<FilterOption>,
        include: Vec<String>,
        exclude: Vec<String>,
    },
}

impl FilterValue {
    /// Type tag used by `@libs/filterInputs`
    pub fn type_tag(&self) -> &'static str {
        match self {
            FilterValue::Text(_) => "Text",
            FilterValue::Picker { .. } => "Picker",
            FilterValue::CheckboxGroup { .. } => "Checkbox",
            FilterValue::Switch(_) => "Switch",
            FilterValue::ExcludableCheckboxGroup { .. } => "XCheckbox",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FilterValue::Text(text) => json!(text),
            FilterValue::Picker { selected, .. } => json!(selected),
            FilterValue::CheckboxGroup { checked, .. } => json!(checked),
            FilterValue::Switch(on) => json!(on),
            FilterValue::ExcludableCheckboxGroup { include, exclude, .. } => {
                json!({ "include": include, "exclude": exclude })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub key: String,
    pub label: String,
    pub value: FilterValue,
}

/// Ordered list of filters exposed by one source
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterList {
    pub filters: Vec<Filter>,
}

impl FilterList {
    /// Decode the normalized `filters` payload. Entries of unknown type are skipped.
    pub fn from_plugin_json(payload: &Value) -> Self {
        let Some(entries) = payload.as_object() else {
            return Self::default();
        };

        let filters = entries
            .iter()
            .filter_map(|(key, entry)| decode_filter(key, entry))
            .collect();

        Self { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.key == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Filter> {
        self.filters.iter_mut().find(|f| f.key == key)
    }

    /// Values object passed to the plugin: `{ key: { type, value } }`
    pub fn to_values(&self) -> Value {
        let mut values = Map::new();
        for filter in &self.filters {
            values.insert(
                filter.key.clone(),
                json!({ "type": filter.value.type_tag(), "value": filter.value.to_json() }),
            );
        }
        Value::Object(values)
    }
}

fn decode_filter(key: &str, entry: &Value) -> Option<Filter> {
    let kind = entry.get("type")?.as_str()?;
    let label = entry
        .get("label")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();
    let value = entry.get("value").unwrap_or(&Value::Null);

    let value = match kind {
        "Text" => FilterValue::Text(value.as_str().unwrap_or_default().to_string()),
        "Picker" => FilterValue::Picker {
            options: decode_options(entry),
            selected: scalar_string(value),
        },
        "Checkbox" => FilterValue::CheckboxGroup {
            options: decode_options(entry),
            checked: string_list(value),
        },
        "Switch" => FilterValue::Switch(value.as_bool().unwrap_or(false)),
        "XCheckbox" => FilterValue::ExcludableCheckboxGroup {
            options: decode_options(entry),
            include: string_list(value.get("include").unwrap_or(&Value::Null)),
            exclude: string_list(value.get("exclude").unwrap_or(&Value::Null)),
        },
        _ => return None,
    };

    Some(Filter {
        key: key.to_string(),
        label,
        value,
    })
}

fn decode_options(entry: &Value) -> Vec<FilterOption> {
    entry
        .get("options")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|option| {
                    let value = scalar_string(option.get("value")?);
                    let label = option
                        .get("label")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.clone());
                    Some(FilterOption { label, value })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().map(scalar_string).collect())
        .unwrap_or_default()
}
