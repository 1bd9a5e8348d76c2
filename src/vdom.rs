//! Virtual-node types produced by the renderer.
//!
//! The reconciliation of these nodes against a live DOM belongs to the mount
//! layer; the runtime only builds and rebuilds the trees. Event handlers are
//! closures invoked with one JSON event record.

use crate::handle::Handle;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub type EventHandler = Rc<dyn Fn(&Value)>;

#[derive(Clone)]
pub enum VNode {
    Element(VElement),
    Text(String),
    Component(VComponent),
}

#[derive(Clone)]
pub struct VElement {
    pub tag: String,
    pub sid: String,
    /// Evaluated property map. BTreeMap keeps snapshot output stable.
    pub props: BTreeMap<String, Value>,
    pub events: HashMap<String, EventHandler>,
    pub children: Vec<VNode>,
}

/// A component instance node: carries the instance identity and bindings for
/// the mount layer, plus the already-expanded template output.
#[derive(Clone)]
pub struct VComponent {
    pub name: String,
    pub sid: String,
    pub params: BTreeMap<String, Value>,
    pub handle_params: BTreeMap<String, Handle>,
    pub passthrough: BTreeMap<String, Value>,
    pub children: Vec<VNode>,
}

pub fn element(tag: &str, sid: &str) -> VElement {
    VElement {
        tag: tag.to_string(),
        sid: sid.to_string(),
        props: BTreeMap::new(),
        events: HashMap::new(),
        children: Vec::new(),
    }
}

pub fn text(content: impl Into<String>) -> VNode {
    VNode::Text(content.into())
}

/// Install an event handler, chaining after any handler already present.
pub fn chain_event(events: &mut HashMap<String, EventHandler>, name: &str, handler: EventHandler) {
    match events.remove(name) {
        Some(existing) => {
            let chained: EventHandler = Rc::new(move |ev: &Value| {
                existing(ev);
                handler(ev);
            });
            events.insert(name.to_string(), chained);
        }
        None => {
            events.insert(name.to_string(), handler);
        }
    }
}

impl VNode {
    pub fn as_element(&self) -> Option<&VElement> {
        match self {
            VNode::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Concatenated text content of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(node: &VNode, out: &mut String) {
    match node {
        VNode::Text(t) => out.push_str(t),
        VNode::Element(el) => {
            for child in &el.children {
                collect_text(child, out);
            }
        }
        VNode::Component(c) => {
            for child in &c.children {
                collect_text(child, out);
            }
        }
    }
}

/// Depth-first walk over every node in a tree list.
pub fn walk<'a>(nodes: &'a [VNode], visit: &mut dyn FnMut(&'a VNode)) {
    for node in nodes {
        visit(node);
        match node {
            VNode::Element(el) => walk(&el.children, visit),
            VNode::Component(c) => walk(&c.children, visit),
            VNode::Text(_) => {}
        }
    }
}

/// All elements with the given tag, in document order.
pub fn find_by_tag<'a>(nodes: &'a [VNode], tag: &str) -> Vec<&'a VElement> {
    let mut found = Vec::new();
    walk(nodes, &mut |node| {
        if let VNode::Element(el) = node {
            if el.tag == tag {
                found.push(el);
            }
        }
    });
    found
}

/// Debug snapshot of a tree as a JSON value (props and text only; events are
/// elided). Used by tests to compare rendered output.
pub fn outline(nodes: &[VNode]) -> Value {
    Value::Array(nodes.iter().map(outline_node).collect())
}

fn outline_node(node: &VNode) -> Value {
    match node {
        VNode::Text(t) => Value::String(t.clone()),
        VNode::Element(el) => serde_json::json!({
            "tag": el.tag,
            "props": el.props.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<serde_json::Map<_, _>>(),
            "children": outline(&el.children),
        }),
        VNode::Component(c) => serde_json::json!({
            "component": c.name,
            "children": outline(&c.children),
        }),
    }
}
