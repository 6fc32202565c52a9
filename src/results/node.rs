//! Structured result element tree
//!
//! A small, owned element tree (name, ordered attributes, optional text,
//! children) used for result documents, explore output and filter
//! documents. It serializes with serde for transport between processes and
//! writes itself as XML for result files.

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One element of a result document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultNode {
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children(&self) -> &[ResultNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<ResultNode> {
        &mut self.children
    }

    /// Builder-style attribute
    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Set an attribute, replacing an existing value in place
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attr(&mut self, key: &str) {
        self.attributes.retain(|(k, _)| k != key);
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric attribute; missing or malformed values read as zero
    pub fn attr_u64(&self, key: &str) -> u64 {
        self.attr(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: ResultNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_child(&mut self, child: ResultNode) {
        self.children.push(child);
    }

    /// Insert a child at `index`, appending when past the end
    pub fn insert_child(&mut self, index: usize, child: ResultNode) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    /// First direct child with the given element name
    pub fn child(&self, name: &str) -> Option<&ResultNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All descendants (depth-first, self excluded) with the given name
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a ResultNode> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a ResultNode>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect(name, found);
        }
    }

    /// Indented XML, one element per line
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, Some(0));
        out
    }

    /// XML without any whitespace between elements
    pub fn to_compact_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, None);
        out
    }

    fn write_xml(&self, out: &mut String, depth: Option<usize>) {
        if let Some(depth) = depth {
            out.push_str(&"  ".repeat(depth));
        }
        let _ = write!(out, "<{}", self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", key, escape(value.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>");
        } else {
            out.push('>');
            if let Some(text) = &self.text {
                out.push_str(&escape(text.as_str()));
            }
            if !self.children.is_empty() {
                let next = depth.map(|d| d + 1);
                for child in &self.children {
                    if next.is_some() {
                        out.push('\n');
                    }
                    child.write_xml(out, next);
                }
                if let Some(depth) = depth {
                    out.push('\n');
                    out.push_str(&"  ".repeat(depth));
                }
            }
            let _ = write!(out, "</{}>", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_attr_replaces_in_place() {
        let mut node = ResultNode::new("test-suite")
            .with_attr("result", "Passed")
            .with_attr("total", 3);
        node.set_attr("result", "Failed");

        assert_eq!(node.attr("result"), Some("Failed"));
        assert_eq!(node.attributes()[0].0, "result");
        assert_eq!(node.attr_u64("total"), 3);
        assert_eq!(node.attr_u64("missing"), 0);
    }

    #[test]
    fn test_compact_xml() {
        let node = ResultNode::new("filter").with_child(
            ResultNode::new("tests").with_child(ResultNode::new("test").with_text("A<B")),
        );
        assert_eq!(
            node.to_compact_xml(),
            "<filter><tests><test>A&lt;B</test></tests></filter>"
        );
        assert_eq!(ResultNode::new("filter").to_compact_xml(), "<filter/>");
    }

    #[test]
    fn test_indented_xml() {
        let node = ResultNode::new("test-run")
            .with_attr("result", "Passed")
            .with_child(ResultNode::new("test-case").with_attr("name", "a \"quoted\""));
        let xml = node.to_xml();

        assert!(xml.starts_with("<test-run result=\"Passed\">\n"));
        assert!(xml.contains("  <test-case name=\"a &quot;quoted&quot;\"/>"));
        assert!(xml.ends_with("</test-run>"));
    }

    #[test]
    fn test_find_all_and_insert() {
        let mut node = ResultNode::new("test-run").with_child(
            ResultNode::new("test-suite").with_child(ResultNode::new("test-case")),
        );
        node.add_child(ResultNode::new("test-case"));
        node.insert_child(0, ResultNode::new("filter"));

        assert_eq!(node.find_all("test-case").len(), 2);
        assert_eq!(node.children()[0].name(), "filter");
        assert!(node.child("test-suite").is_some());
    }
}
