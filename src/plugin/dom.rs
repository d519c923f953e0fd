//! Parsed document store behind the guest `cheerio` module
//!
//! Documents stay parsed on the engine thread and guest code refers to nodes
//! by numeric handle, so traversal and selection always run against the
//! original tree. Re-parsing a detached `<tr>` or `<td>` outside its table
//! would drop it.
//!
//! A node keeps the same handle for as long as its document is loaded.
//! Handles are never reused; after [`DomStore::release_all`] stale handles
//! resolve to nothing.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use ego_tree::{NodeId, NodeMut, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};

/// Guest-visible node identifier
pub type Handle = u32;

/// Relationship walked by [`DomStore::query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Descendant elements, excluding the node itself
    Find,
    Children,
    /// Child elements and text nodes
    Contents,
    Parent,
    Parents,
    /// The node itself or its nearest matching ancestor
    Closest,
    Next,
    NextAll,
    Prev,
    PrevAll,
    Siblings,
}

impl FromStr for Axis {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "find" => Axis::Find,
            "children" => Axis::Children,
            "contents" => Axis::Contents,
            "parent" => Axis::Parent,
            "parents" => Axis::Parents,
            "closest" => Axis::Closest,
            "next" => Axis::Next,
            "nextAll" => Axis::NextAll,
            "prev" => Axis::Prev,
            "prevAll" => Axis::PrevAll,
            "siblings" => Axis::Siblings,
            other => return Err(anyhow!("Unknown DOM axis: {}", other)),
        })
    }
}

/// Value read by [`DomStore::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Html,
    OuterHtml,
    Text,
    Attr,
    /// All attributes as a JSON object
    Attrs,
    Data,
    Val,
    TagName,
    /// `tag`, `text`, `comment` or `root`
    NodeType,
}

impl FromStr for Property {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "html" => Property::Html,
            "outerHtml" => Property::OuterHtml,
            "text" => Property::Text,
            "attr" => Property::Attr,
            "attrs" => Property::Attrs,
            "data" => Property::Data,
            "val" => Property::Val,
            "tagName" => Property::TagName,
            "nodeType" => Property::NodeType,
            other => return Err(anyhow!("Unknown DOM property: {}", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeKey {
    document: u32,
    node: NodeId,
}

/// Per-runtime arena of parsed documents
#[derive(Default)]
pub struct DomStore {
    documents: HashMap<u32, Html>,
    handles: HashMap<Handle, NodeKey>,
    keys: HashMap<NodeKey, Handle>,
    next_document: u32,
    next_handle: Handle,
}

impl DomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `html` as a document and return the handle of its root
    pub fn load(&mut self, html: &str) -> Handle {
        let document = Html::parse_document(html);
        let root = document.tree.root().id();

        let id = self.next_document;
        self.next_document = self.next_document.wrapping_add(1);
        self.documents.insert(id, document);

        self.handle_for(NodeKey { document: id, node: root })
    }

    /// Number of documents currently loaded
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Drop every document. Outstanding handles resolve to nothing afterwards.
    pub fn release_all(&mut self) {
        self.documents.clear();
        self.handles.clear();
        self.keys.clear();
    }

    /// Walk `axis` from `handle`, keeping nodes that match `selector`
    ///
    /// `find` and `closest` require a selector; for the other axes it is an
    /// optional filter.
    pub fn query(&mut self, handle: Handle, axis: Axis, selector: Option<&str>) -> Result<Vec<Handle>> {
        let selector = selector.map(parse_selector).transpose()?;
        if selector.is_none() && matches!(axis, Axis::Find | Axis::Closest) {
            return Err(anyhow!("{:?} requires a selector", axis));
        }

        let Some(key) = self.handles.get(&handle).copied() else {
            return Ok(Vec::new());
        };
        let Some(node) = self.node(key) else {
            return Ok(Vec::new());
        };

        let wanted = |n: &NodeRef<'_, Node>| is_element(n) && matches(n, selector.as_ref());
        let ids: Vec<NodeId> = match axis {
            Axis::Find => node.descendants().skip(1).filter(wanted).map(|n| n.id()).collect(),
            Axis::Children => node.children().filter(wanted).map(|n| n.id()).collect(),
            Axis::Contents => node
                .children()
                .filter(|n| n.value().is_element() || n.value().is_text())
                .map(|n| n.id())
                .collect(),
            Axis::Parent => node.parent().filter(wanted).map(|n| n.id()).into_iter().collect(),
            Axis::Parents => node.ancestors().filter(wanted).map(|n| n.id()).collect(),
            Axis::Closest => std::iter::once(node)
                .chain(node.ancestors())
                .find(wanted)
                .map(|n| n.id())
                .into_iter()
                .collect(),
            Axis::Next => node
                .next_siblings()
                .find(is_element)
                .filter(wanted)
                .map(|n| n.id())
                .into_iter()
                .collect(),
            Axis::NextAll => node.next_siblings().filter(wanted).map(|n| n.id()).collect(),
            Axis::Prev => node
                .prev_siblings()
                .find(is_element)
                .filter(wanted)
                .map(|n| n.id())
                .into_iter()
                .collect(),
            Axis::PrevAll => node.prev_siblings().filter(wanted).map(|n| n.id()).collect(),
            Axis::Siblings => match node.parent() {
                Some(parent) => parent
                    .children()
                    .filter(|n| n.id() != node.id())
                    .filter(wanted)
                    .map(|n| n.id())
                    .collect(),
                None => Vec::new(),
            },
        };

        Ok(ids
            .into_iter()
            .map(|id| self.handle_for(NodeKey { document: key.document, node: id }))
            .collect())
    }

    /// Read one property of a node; `None` when the node or value is absent
    pub fn read(&self, handle: Handle, property: Property, name: Option<&str>) -> Option<String> {
        let key = self.handles.get(&handle)?;
        let document = self.documents.get(&key.document)?;
        let node = document.tree.get(key.node)?;
        let element = ElementRef::wrap(node);

        match property {
            Property::Html => match (node.value(), element) {
                (_, Some(element)) => Some(element.inner_html()),
                (Node::Text(text), None) => Some(text.to_string()),
                _ if node.parent().is_none() => Some(document.html()),
                _ => None,
            },
            Property::OuterHtml => match (node.value(), element) {
                (_, Some(element)) => Some(element.html()),
                (Node::Text(text), None) => Some(text.to_string()),
                _ if node.parent().is_none() => Some(document.html()),
                _ => None,
            },
            Property::Text => Some(text_of(node)),
            Property::Attr => element?.value().attr(name?).map(str::to_string),
            Property::Attrs => {
                let attrs: BTreeMap<&str, &str> = element.map(|e| e.value().attrs().collect()).unwrap_or_default();
                serde_json::to_string(&attrs).ok()
            }
            Property::Data => element?
                .value()
                .attr(&format!("data-{}", name?))
                .map(str::to_string),
            Property::Val => {
                let element = element?;
                match element.value().name() {
                    "textarea" => Some(text_of(node)),
                    "select" => element
                        .descendants()
                        .filter_map(ElementRef::wrap)
                        .find(|e| e.value().name() == "option" && e.value().attr("selected").is_some())
                        .and_then(|e| e.value().attr("value").map(str::to_string)),
                    _ => element.value().attr("value").map(str::to_string),
                }
            }
            Property::TagName => Some(element.map(|e| e.value().name().to_string()).unwrap_or_default()),
            Property::NodeType => Some(
                match node.value() {
                    Node::Element(_) => "tag",
                    Node::Text(_) => "text",
                    Node::Comment(_) => "comment",
                    _ => "root",
                }
                .to_string(),
            ),
        }
    }

    /// Whether the node is an element matching `selector`
    pub fn is(&self, handle: Handle, selector: &str) -> Result<bool> {
        let selector = parse_selector(selector)?;
        Ok(self
            .handles
            .get(&handle)
            .and_then(|key| self.node(*key))
            .map_or(false, |node| is_element(&node) && matches(&node, Some(&selector))))
    }

    /// Whether any descendant element matches `selector`
    pub fn has(&self, handle: Handle, selector: &str) -> Result<bool> {
        let selector = parse_selector(selector)?;
        Ok(self
            .handles
            .get(&handle)
            .and_then(|key| self.node(*key))
            .map_or(false, |node| {
                node.descendants()
                    .skip(1)
                    .any(|n| is_element(&n) && matches(&n, Some(&selector)))
            }))
    }

    /// Detach the node from its document. The root cannot be removed.
    pub fn remove(&mut self, handle: Handle) {
        let Some(key) = self.handles.get(&handle).copied() else {
            return;
        };
        let Some(document) = self.documents.get_mut(&key.document) else {
            return;
        };
        if let Some(mut node) = document.tree.get_mut(key.node) {
            if node.parent().is_some() {
                node.detach();
            }
        }
    }

    /// Replace the node with the nodes parsed from `html`
    pub fn replace_with(&mut self, handle: Handle, html: &str) {
        let Some(key) = self.handles.get(&handle).copied() else {
            return;
        };
        let Some(document) = self.documents.get_mut(&key.document) else {
            return;
        };
        let attached = document.tree.get(key.node).map_or(false, |n| n.parent().is_some());
        if !attached {
            return;
        }

        let fragment = Html::parse_fragment(html);
        for child in fragment.root_element().children() {
            let Some(mut target) = document.tree.get_mut(key.node) else {
                return;
            };
            let mut copied = target.insert_before(child.value().clone());
            copy_children(&mut copied, child);
        }
        if let Some(mut target) = document.tree.get_mut(key.node) {
            target.detach();
        }
    }

    fn node(&self, key: NodeKey) -> Option<NodeRef<'_, Node>> {
        self.documents.get(&key.document)?.tree.get(key.node)
    }

    fn handle_for(&mut self, key: NodeKey) -> Handle {
        if let Some(handle) = self.keys.get(&key) {
            return *handle;
        }
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.handles.insert(handle, key);
        self.keys.insert(key, handle);
        handle
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid selector {:?}: {:?}", selector, e))
}

fn is_element(node: &NodeRef<'_, Node>) -> bool {
    node.value().is_element()
}

fn matches(node: &NodeRef<'_, Node>, selector: Option<&Selector>) -> bool {
    match selector {
        None => true,
        Some(selector) => ElementRef::wrap(*node).map_or(false, |element| selector.matches(&element)),
    }
}

fn text_of(node: NodeRef<'_, Node>) -> String {
    node.descendants()
        .filter_map(|n| n.value().as_text().map(|text| text.to_string()))
        .collect()
}

fn copy_children(dest: &mut NodeMut<'_, Node>, source: NodeRef<'_, Node>) {
    for child in source.children() {
        let mut copied = dest.append(child.value().clone());
        copy_children(&mut copied, child);
    }
}
