//! Host-document parsing.
//!
//! The browser-grade HTML parser (html5ever) turns the page into a DOM; this
//! module lifts the declarative parts out of it: the optional setup tag, the
//! declarative roots, and the component templates defined inside them. The
//! renderer walks these authored template trees, never the live DOM.

use crate::error::RuntimeError;
use html5ever::parse_document as parse_html;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum TemplateNode {
    Element(ElementNode),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ElementNode {
    /// Lower-cased tag name (the HTML parser folds case).
    pub tag: String,
    /// Attributes in authored order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<TemplateNode>,
    /// Source segment `TAG#INDEX`: position among the parent's element
    /// children in the authored document.
    pub segment: String,
}

impl ElementNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n == name)
    }
}

/// One declarative root: its reserved attributes and cloned template children.
#[derive(Debug, Clone)]
pub struct RootSpec {
    pub index: usize,
    pub attrs: Vec<(String, String)>,
    pub nodes: Vec<TemplateNode>,
}

/// A component definition lifted out of the document.
#[derive(Debug, Clone)]
pub struct TemplateSpec {
    pub name: String,
    pub params: Option<String>,
    pub init: Option<String>,
    pub nodes: Vec<TemplateNode>,
}

#[derive(Debug, Clone)]
pub struct SetupSpec {
    pub init: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub setup: Option<SetupSpec>,
    pub roots: Vec<RootSpec>,
    pub templates: Vec<TemplateSpec>,
}

pub const ROOT_TAG: &str = "weft-app";
pub const SETUP_TAG: &str = "weft-setup";
pub const TEMPLATE_SUFFIX: &str = ":template";
pub const SLOT_SUFFIX: &str = ":slot";

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a host document and lift out setup, roots, and templates.
/// Structural rules enforced here: at most one setup tag, and it must
/// precede every declarative root in document order.
pub fn parse_document(html: &str) -> Result<ParsedDocument, RuntimeError> {
    let dom = parse_html(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .map_err(|e| RuntimeError::structural(format!("Failed to parse document: {}", e)))?;

    let mut setups: Vec<(usize, SetupSpec)> = Vec::new();
    let mut roots: Vec<(usize, RootSpec)> = Vec::new();
    let mut position = 0usize;
    discover(&dom.document, &mut position, &mut setups, &mut roots);

    if setups.len() > 1 {
        return Err(RuntimeError::structural(
            "A page may contain at most one setup tag.",
        ));
    }
    if let (Some((setup_pos, _)), Some((first_root_pos, _))) = (setups.first(), roots.first()) {
        if setup_pos > first_root_pos {
            return Err(RuntimeError::structural(
                "The setup tag must precede every declarative root.",
            ));
        }
    }

    let mut templates = Vec::new();
    let roots = roots
        .into_iter()
        .map(|(_, mut root)| {
            root.nodes = extract_templates(root.nodes, &mut templates);
            root
        })
        .collect();

    Ok(ParsedDocument {
        setup: setups.into_iter().next().map(|(_, s)| s),
        roots,
        templates,
    })
}

/// Depth-first discovery of setup tags and declarative roots, recording
/// document order. Roots nested inside other roots are left to the outer
/// root's template.
fn discover(
    node: &Handle,
    position: &mut usize,
    setups: &mut Vec<(usize, SetupSpec)>,
    roots: &mut Vec<(usize, RootSpec)>,
) {
    if let NodeData::Element { name, attrs, .. } = &node.data {
        *position += 1;
        let tag = name.local.to_string().to_lowercase();
        if tag == SETUP_TAG {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect::<Vec<_>>();
            let init = attrs
                .iter()
                .find(|(n, _)| n == "init")
                .map(|(_, v)| v.clone());
            setups.push((*position, SetupSpec { init }));
            return;
        }
        if tag == ROOT_TAG {
            let attrs = attrs
                .borrow()
                .iter()
                .map(|a| (a.name.local.to_string(), a.value.to_string()))
                .collect();
            let nodes = convert_children(node);
            roots.push((
                *position,
                RootSpec {
                    index: roots.len(),
                    attrs,
                    nodes,
                },
            ));
            return;
        }
    }
    for child in node.children.borrow().iter() {
        discover(child, position, setups, roots);
    }
}

/// Convert a DOM node's children into template nodes, assigning source
/// segments. Whitespace-only text and comments are dropped.
fn convert_children(node: &Handle) -> Vec<TemplateNode> {
    let mut out = Vec::new();
    let mut element_index = 0usize;
    for child in node.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                if !text.trim().is_empty() {
                    out.push(TemplateNode::Text(text));
                }
            }
            NodeData::Element { name, attrs, .. } => {
                let tag = name.local.to_string().to_lowercase();
                let attrs = attrs
                    .borrow()
                    .iter()
                    .map(|a| (a.name.local.to_string(), a.value.to_string()))
                    .collect();
                let children = convert_children(child);
                out.push(TemplateNode::Element(ElementNode {
                    segment: format!("{}#{}", tag, element_index),
                    tag,
                    attrs,
                    children,
                }));
                element_index += 1;
            }
            _ => {}
        }
    }
    out
}

/// Lift `NAME:template` definitions out of a node list (recursively),
/// returning the remaining nodes. Definitions register by their name prefix;
/// the defining element never renders.
fn extract_templates(
    nodes: Vec<TemplateNode>,
    out: &mut Vec<TemplateSpec>,
) -> Vec<TemplateNode> {
    let mut remaining = Vec::new();
    for node in nodes {
        match node {
            TemplateNode::Element(el) if el.tag.ends_with(TEMPLATE_SUFFIX) => {
                let name = el.tag[..el.tag.len() - TEMPLATE_SUFFIX.len()].to_string();
                let params = el.attr("params").map(|s| s.to_string());
                let init = el.attr("init").map(|s| s.to_string());
                let body = extract_templates(el.children, out);
                out.push(TemplateSpec {
                    name,
                    params,
                    init,
                    nodes: body,
                });
            }
            TemplateNode::Element(mut el) => {
                el.children = extract_templates(el.children, out);
                remaining.push(TemplateNode::Element(el));
            }
            text => remaining.push(text),
        }
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_root() {
        let doc = parse_document(
            r#"<html><body><weft-app id="main"><div class="x">Hi {name}</div></weft-app></body></html>"#,
        )
        .unwrap();
        assert_eq!(doc.roots.len(), 1);
        let root = &doc.roots[0];
        assert!(root.attrs.iter().any(|(n, v)| n == "id" && v == "main"));
        assert_eq!(root.nodes.len(), 1);
        match &root.nodes[0] {
            TemplateNode::Element(el) => {
                assert_eq!(el.tag, "div");
                assert_eq!(el.segment, "div#0");
                assert_eq!(el.attr("class"), Some("x"));
            }
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_source_segments_index_elements() {
        let doc = parse_document(
            "<weft-app><span>a</span><p>b</p><span>c</span></weft-app>",
        )
        .unwrap();
        let segs: Vec<String> = doc.roots[0]
            .nodes
            .iter()
            .filter_map(|n| match n {
                TemplateNode::Element(el) => Some(el.segment.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(segs, vec!["span#0", "p#1", "span#2"]);
    }

    #[test]
    fn test_template_extraction() {
        let doc = parse_document(
            "<weft-app><card:template params=\"$title\"><h2>{$title}</h2><card:slot></card:slot></card:template><card title=\"Hi\"></card></weft-app>",
        )
        .unwrap();
        assert_eq!(doc.templates.len(), 1);
        assert_eq!(doc.templates[0].name, "card");
        assert_eq!(doc.templates[0].params.as_deref(), Some("$title"));
        // The definition itself no longer appears among the root's nodes.
        assert_eq!(doc.roots[0].nodes.len(), 1);
    }

    #[test]
    fn test_single_setup_before_root() {
        let err = parse_document(
            "<weft-app></weft-app><weft-setup init=\"{ {} }\"></weft-setup>",
        )
        .unwrap_err();
        assert!(err.is(crate::error::ERR_STRUCTURAL));

        let err = parse_document(
            "<weft-setup></weft-setup><weft-setup></weft-setup><weft-app></weft-app>",
        )
        .unwrap_err();
        assert!(err.is(crate::error::ERR_STRUCTURAL));

        let ok = parse_document("<weft-setup init=\"{ {} }\"></weft-setup><weft-app></weft-app>");
        assert!(ok.is_ok());
    }
}
