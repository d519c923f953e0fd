//! CSS selector primitive for the guest `cheerio` module
//!
//! Matching is done by a real HTML5 parser (`scraper`/html5ever); the guest
//! only receives flat node snapshots and never re-implements selection.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Snapshot of one matched element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedNode {
    /// Inner HTML
    pub html: String,
    pub outer_html: String,
    /// Concatenated descendant text
    pub text: String,
    pub attrs: BTreeMap<String, String>,
    pub tag_name: String,
}

/// Run `selector` against `html` and return matches in document order
pub fn select(html: &str, selector: &str) -> Result<Vec<SelectedNode>> {
    let selector = Selector::parse(selector).map_err(|e| anyhow!("Invalid selector {:?}: {:?}", selector, e))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .map(|element| SelectedNode {
            html: element.inner_html(),
            outer_html: element.html(),
            text: element.text().collect(),
            attrs: element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            tag_name: element.value().name().to_string(),
        })
        .collect())
}

/// JSON form handed to the guest
pub fn select_json(html: &str, selector: &str) -> Result<String> {
    Ok(serde_json::to_string(&select(html, selector)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <ul class="novels">
            <li class="novel"><a href="/n/1" title="First">First <b>Novel</b></a></li>
            <li class="novel"><a href="/n/2">Second</a></li>
          </ul>
        </body></html>
    "#;

    #[test]
    fn test_select_returns_document_order() {
        let nodes = select(PAGE, "li.novel a").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].attrs.get("href").map(String::as_str), Some("/n/1"));
        assert_eq!(nodes[0].text, "First Novel");
        assert_eq!(nodes[0].html, "First <b>Novel</b>");
        assert_eq!(nodes[0].tag_name, "a");
        assert!(nodes[1].outer_html.starts_with("<a href=\"/n/2\""));
    }

    #[test]
    fn test_select_on_fragment() {
        let nodes = select("<div><p>one</p><p>two</p></div>", "p").unwrap();
        let texts: Vec<_> = nodes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_invalid_selector() {
        assert!(select(PAGE, "li[").is_err());
    }

    #[test]
    fn test_select_json_shape() {
        let json = select_json(PAGE, "ul").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["attrs"]["class"], "novels");
        assert!(value[0]["outerHtml"].as_str().unwrap().starts_with("<ul"));
    }
}
