//! Handles to the page a pipeline runs against.
//!
//! The live document is an external collaborator; the runtime only needs to
//! read a few properties from it and scope queries to an element root.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Read-only view of a page.
pub trait Document: Send + Sync + fmt::Debug {
    fn url(&self) -> &str;
    fn title(&self) -> &str;

    /// Text of every element matching `selector`, restricted to descendants
    /// of `scope` when one is given.
    fn query_text(&self, scope: Option<&str>, selector: &str) -> Vec<String>;

    fn matches(&self, selector: &str) -> bool {
        !self.query_text(None, selector).is_empty()
    }
}

/// A page snapshot loaded from JSON.
///
/// `elements` maps full selectors to the texts of matching elements. Scoped
/// queries look up `"<scope> <selector>"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDocument {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub elements: BTreeMap<String, Vec<String>>,
}

impl StaticDocument {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            elements: BTreeMap::new(),
        }
    }

    pub fn with_element(mut self, selector: impl Into<String>, texts: Vec<String>) -> Self {
        self.elements.insert(selector.into(), texts);
        self
    }

    /// Read a snapshot from a JSON file at `path`.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let doc: Self = serde_json::from_str(&data)?;
        Ok(doc)
    }
}

impl Document for StaticDocument {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn query_text(&self, scope: Option<&str>, selector: &str) -> Vec<String> {
        let key = match scope {
            Some(scope) if selector.is_empty() => scope.to_string(),
            Some(scope) => format!("{scope} {selector}"),
            None => selector.to_string(),
        };
        self.elements.get(&key).cloned().unwrap_or_default()
    }
}

/// The root a brick runs against: the whole document or one element in it.
#[derive(Debug, Clone)]
pub enum RootHandle {
    Document(Arc<dyn Document>),
    Element {
        document: Arc<dyn Document>,
        selector: String,
    },
}

impl RootHandle {
    pub fn document(doc: impl Document + 'static) -> Self {
        RootHandle::Document(Arc::new(doc))
    }

    /// The page this root belongs to.
    pub fn page(&self) -> &Arc<dyn Document> {
        match self {
            RootHandle::Document(doc) => doc,
            RootHandle::Element { document, .. } => document,
        }
    }

    /// Reset to the top-level document.
    pub fn to_document(&self) -> RootHandle {
        RootHandle::Document(self.page().clone())
    }

    /// An element root for `selector`, relative to this root.
    pub fn scoped(&self, selector: &str) -> RootHandle {
        let selector = match self {
            RootHandle::Document(_) => selector.to_string(),
            RootHandle::Element { selector: parent, .. } => format!("{parent} {selector}"),
        };
        RootHandle::Element {
            document: self.page().clone(),
            selector,
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            RootHandle::Document(_) => None,
            RootHandle::Element { selector, .. } => Some(selector),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, RootHandle::Document(_))
    }

    /// Texts matching `selector` under this root.
    pub fn query_text(&self, selector: &str) -> Vec<String> {
        self.page().query_text(self.selector(), selector)
    }
}
