//! The reactive substrate: namespace store, notification batching, mount
//! bookkeeping, and the ambient registries (external functions, component
//! names).
//!
//! The substrate is created once by the bootstrap and injected into the
//! renderer; nothing in the crate reaches for a global. Scheduling is
//! single-threaded cooperative: writes mark a namespace dirty, and `flush`
//! drains the batch — rerendering every mounted root, notifying subscribers,
//! then running queued microtasks — until the system is quiescent.

use crate::error::RuntimeError;
use crate::handle::{read_path, write_path, Handle};
use crate::vdom::{element, VNode};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

pub type ExternalFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;
pub type RenderFn = Box<dyn Fn() -> Result<Vec<VNode>, RuntimeError>>;

/// Rounds of dirty-drain per flush before the substrate assumes a feedback
/// loop and stops.
const MAX_FLUSH_ROUNDS: usize = 64;

pub struct Mount {
    pub container: String,
    render: RenderFn,
    tree: RefCell<Vec<VNode>>,
}

pub struct Substrate {
    namespaces: RefCell<HashMap<String, Rc<RefCell<Value>>>>,
    dirty: RefCell<HashSet<String>>,
    subscribers: RefCell<Vec<(String, Rc<dyn Fn()>)>>,
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    externals: RefCell<HashMap<String, ExternalFn>>,
    component_names: RefCell<HashSet<String>>,
    mounts: RefCell<Vec<Rc<Mount>>>,
    pre_render: RefCell<Option<Box<dyn Fn()>>>,
    post_render: RefCell<Option<Box<dyn Fn()>>>,
}

impl Substrate {
    pub fn new() -> Rc<Self> {
        Rc::new(Substrate {
            namespaces: RefCell::new(HashMap::new()),
            dirty: RefCell::new(HashSet::new()),
            subscribers: RefCell::new(Vec::new()),
            tasks: RefCell::new(VecDeque::new()),
            externals: RefCell::new(HashMap::new()),
            component_names: RefCell::new(HashSet::new()),
            mounts: RefCell::new(Vec::new()),
            pre_render: RefCell::new(None),
            post_render: RefCell::new(None),
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Namespaces
    // ───────────────────────────────────────────────────────────────────────

    /// Get or lazily create a namespace root. Creation is unobservable and
    /// does not mark the namespace dirty.
    pub fn namespace(&self, id: &str) -> Rc<RefCell<Value>> {
        self.namespaces
            .borrow_mut()
            .entry(id.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(Value::Object(Map::new()))))
            .clone()
    }

    /// Get or create a namespace, seeding it with `init` on first creation.
    /// Returns true when the namespace was created by this call.
    pub fn namespace_with_init(&self, id: &str, init: Value) -> bool {
        let mut map = self.namespaces.borrow_mut();
        if map.contains_key(id) {
            return false;
        }
        map.insert(id.to_string(), Rc::new(RefCell::new(init)));
        true
    }

    pub fn has_namespace(&self, id: &str) -> bool {
        self.namespaces.borrow().contains_key(id)
    }

    pub fn remove_namespace(&self, id: &str) {
        self.namespaces.borrow_mut().remove(id);
    }

    /// Read through a handle: owned snapshot, `Null` past any missing or
    /// null intermediate.
    pub fn read(&self, handle: &Handle) -> Value {
        let ns = self.namespace(&handle.root);
        let root = ns.borrow();
        if handle.path.is_empty() {
            return root.clone();
        }
        read_path(&root, &handle.path).cloned().unwrap_or(Value::Null)
    }

    /// Write through a handle: the central mutation path. Creates
    /// intermediate objects, assigns, and marks the namespace dirty so the
    /// next flush rerenders.
    pub fn write(&self, handle: &Handle, value: Value) {
        let ns = self.namespace(&handle.root);
        {
            let mut root = ns.borrow_mut();
            if handle.path.is_empty() {
                *root = value;
            } else {
                write_path(&mut root, &handle.path, value);
            }
        }
        self.mark_dirty(&handle.root);
    }

    pub fn mark_dirty(&self, ns_id: &str) {
        self.dirty.borrow_mut().insert(ns_id.to_string());
    }

    // ───────────────────────────────────────────────────────────────────────
    // Registries
    // ───────────────────────────────────────────────────────────────────────

    pub fn register_external(&self, name: &str, f: ExternalFn) {
        self.externals.borrow_mut().insert(name.to_string(), f);
    }

    /// Ambient lookup for imported identifiers. Case-sensitive.
    pub fn external(&self, name: &str) -> Option<ExternalFn> {
        self.externals.borrow().get(name).cloned()
    }

    pub fn register_component(&self, name: &str) {
        self.component_names.borrow_mut().insert(name.to_lowercase());
    }

    pub fn is_component(&self, name: &str) -> bool {
        self.component_names.borrow().contains(&name.to_lowercase())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Scheduling and mounting
    // ───────────────────────────────────────────────────────────────────────

    /// Queue a microtask; it runs inside the current or next flush, after
    /// rerendering.
    pub fn schedule(&self, task: Box<dyn FnOnce()>) {
        self.tasks.borrow_mut().push_back(task);
    }

    /// Subscribe to change batches of one namespace id.
    pub fn subscribe(&self, ns_id: &str, callback: Rc<dyn Fn()>) {
        self.subscribers
            .borrow_mut()
            .push((ns_id.to_string(), callback));
    }

    /// Mount a render function; it is invoked immediately and again on every
    /// notification batch. A render error replaces the tree with an
    /// error-indicator node.
    pub fn mount(&self, container: &str, render: RenderFn) {
        let mount = Rc::new(Mount {
            container: container.to_string(),
            render,
            tree: RefCell::new(Vec::new()),
        });
        self.mounts.borrow_mut().push(mount);
        self.render_mounts();
    }

    pub fn set_render_hooks(&self, pre: Box<dyn Fn()>, post: Box<dyn Fn()>) {
        *self.pre_render.borrow_mut() = Some(pre);
        *self.post_render.borrow_mut() = Some(post);
    }

    /// The current virtual tree of the mount in `container`, if any.
    pub fn tree(&self, container: &str) -> Option<Vec<VNode>> {
        self.mounts
            .borrow()
            .iter()
            .find(|m| m.container == container)
            .map(|m| m.tree.borrow().clone())
    }

    pub fn mounted_trees(&self) -> Vec<Vec<VNode>> {
        self.mounts
            .borrow()
            .iter()
            .map(|m| m.tree.borrow().clone())
            .collect()
    }

    fn render_mounts(&self) {
        if let Some(pre) = self.pre_render.borrow().as_ref() {
            pre();
        }
        let mounts: Vec<Rc<Mount>> = self.mounts.borrow().iter().cloned().collect();
        for mount in mounts {
            let tree = match (mount.render)() {
                Ok(nodes) => nodes,
                Err(err) => {
                    tracing::warn!(code = %err.code, "render of '{}' failed: {}", mount.container, err.message);
                    vec![error_node(&err)]
                }
            };
            *mount.tree.borrow_mut() = tree;
        }
        if let Some(post) = self.post_render.borrow().as_ref() {
            post();
        }
    }

    /// Drain the current batch: rerender, notify, run microtasks; repeat
    /// until quiescent.
    pub fn flush(&self) {
        for _ in 0..MAX_FLUSH_ROUNDS {
            let dirty: Vec<String> = self.dirty.borrow_mut().drain().collect();
            let idle = dirty.is_empty() && self.tasks.borrow().is_empty();
            if idle {
                return;
            }
            if !dirty.is_empty() {
                self.render_mounts();
                let subscribers = self.subscribers.borrow().clone();
                for (ns_id, callback) in subscribers {
                    if dirty.iter().any(|d| d == &ns_id) {
                        callback();
                    }
                }
            }
            loop {
                let task = self.tasks.borrow_mut().pop_front();
                match task {
                    Some(task) => task(),
                    None => break,
                }
            }
        }
        tracing::warn!("flush did not reach quiescence in {} rounds", MAX_FLUSH_ROUNDS);
    }
}

/// The error-indicator node substituted at a failed boundary.
pub fn error_node(err: &RuntimeError) -> VNode {
    let mut el = element("w-error", "");
    el.props
        .insert("data-code".to_string(), Value::String(err.code.clone()));
    el.children.push(VNode::Text(err.message.clone()));
    VNode::Element(el)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handle_read_write() {
        let substrate = Substrate::new();
        let h = Handle::root("global").join("a").join("b");
        assert_eq!(substrate.read(&h), Value::Null);
        substrate.write(&h, json!(7));
        assert_eq!(substrate.read(&h), json!(7));
        assert_eq!(substrate.read(&Handle::root("global")), json!({"a": {"b": 7}}));
    }

    #[test]
    fn test_namespace_init_once() {
        let substrate = Substrate::new();
        assert!(substrate.namespace_with_init("local:x", json!({"n": 1})));
        assert!(!substrate.namespace_with_init("local:x", json!({"n": 2})));
        assert_eq!(substrate.read(&Handle::root("local:x").join("n")), json!(1));
    }

    #[test]
    fn test_writes_batch_into_one_rerender() {
        let substrate = Substrate::new();
        let renders = Rc::new(RefCell::new(0usize));
        let counter = renders.clone();
        substrate.mount(
            "root",
            Box::new(move || {
                *counter.borrow_mut() += 1;
                Ok(vec![VNode::Text("x".to_string())])
            }),
        );
        assert_eq!(*renders.borrow(), 1);

        substrate.write(&Handle::root("global").join("a"), json!(1));
        substrate.write(&Handle::root("global").join("b"), json!(2));
        substrate.flush();
        assert_eq!(*renders.borrow(), 2);

        substrate.flush();
        assert_eq!(*renders.borrow(), 2);
    }
}
