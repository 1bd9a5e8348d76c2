//! Page bootstrap.
//!
//! Boot parses the host document, applies the one-per-page setup tag,
//! registers component templates, seeds the URL namespace from the current
//! fragment, and mounts one render function per declarative root. The
//! substrate is created here and injected into the renderer; nothing else
//! constructs it.

use crate::compile::CompileStrategy;
use crate::component::register_template;
use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::parse::parse_document;
use crate::render::Renderer;
use crate::substrate::Substrate;
use crate::url::{MemoryUrlHost, UrlHost, UrlSync};
use crate::value::deep_merge;
use crate::vdom::VNode;
use serde_json::Value;
use std::rc::Rc;

#[derive(Default)]
pub struct BootOptions {
    /// Alternative expression-compilation strategy; the built-in evaluator
    /// is used when absent.
    pub strategy: Option<Rc<dyn CompileStrategy>>,
}

/// A booted page: the substrate, renderer, and URL synchronizer wired
/// together, with the accessors tests and embedders drive.
pub struct App {
    pub substrate: Rc<Substrate>,
    pub renderer: Rc<Renderer>,
    host: Rc<dyn UrlHost>,
    url_sync: Rc<UrlSync>,
    containers: Vec<String>,
}

/// Boot a host document against a URL host.
pub fn boot(
    html: &str,
    host: Rc<dyn UrlHost>,
    options: BootOptions,
) -> Result<App, RuntimeError> {
    let doc = parse_document(html)?;

    let substrate = Substrate::new();
    substrate.namespace("global");
    substrate.namespace("url");

    let renderer = Renderer::new(substrate.clone());
    if let Some(strategy) = options.strategy {
        renderer.compiler.set_strategy(strategy);
    }

    {
        let pre = Rc::downgrade(&renderer);
        let post = Rc::downgrade(&renderer);
        substrate.set_render_hooks(
            Box::new(move || {
                if let Some(renderer) = pre.upgrade() {
                    renderer.begin_pass();
                }
            }),
            Box::new(move || {
                if let Some(renderer) = post.upgrade() {
                    renderer.sweep();
                }
            }),
        );
    }

    // Setup tag: its pure init deep-merges into the global namespace.
    if let Some(setup) = &doc.setup {
        if let Some(init) = &setup.init {
            let scope = renderer.base_scope();
            let patch = renderer.value(init, &scope)?;
            if !patch.is_object() {
                return Err(RuntimeError::init_shape(
                    "Setup init must evaluate to an object.",
                ));
            }
            let global = substrate.namespace("global");
            deep_merge(&mut global.borrow_mut(), patch);
        }
    }

    for spec in doc.templates {
        register_template(&renderer, spec)?;
    }

    let url_sync = UrlSync::new(substrate.clone(), host.clone());
    url_sync.apply_inbound();

    let mut containers = Vec::new();
    for root in doc.roots {
        let container = root
            .attrs
            .iter()
            .find(|(n, _)| n == "id")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| format!("root#{}", root.index));
        containers.push(container.clone());

        let root = Rc::new(root);
        let weak = Rc::downgrade(&renderer);
        substrate.mount(
            &container,
            Box::new(move || {
                let renderer = weak
                    .upgrade()
                    .ok_or_else(|| RuntimeError::structural("Renderer was dropped."))?;
                renderer.render_root(&root)
            }),
        );
    }

    url_sync.subscribe_outbound();
    tracing::debug!("mounted {} declarative root(s)", containers.len());

    let app = App {
        substrate,
        renderer,
        host,
        url_sync,
        containers,
    };
    app.flush();
    Ok(app)
}

/// Boot against an in-memory URL host seeded with `fragment`.
pub fn boot_in_memory(html: &str, fragment: &str) -> Result<App, RuntimeError> {
    boot(html, MemoryUrlHost::new(fragment), BootOptions::default())
}

impl App {
    /// Drain the pending change batch: rerender, notify, run microtasks.
    pub fn flush(&self) {
        self.substrate.flush();
    }

    /// The virtual tree of the first declarative root.
    pub fn tree(&self) -> Vec<VNode> {
        self.containers
            .first()
            .and_then(|c| self.substrate.tree(c))
            .unwrap_or_default()
    }

    pub fn tree_of(&self, container: &str) -> Option<Vec<VNode>> {
        self.substrate.tree(container)
    }

    pub fn fragment(&self) -> String {
        self.host.read_fragment()
    }

    /// Simulate a fragment change from the host side (navigation, manual
    /// edit): inbound sync then flush.
    pub fn set_fragment(&self, fragment: &str) {
        self.host.write_fragment(fragment);
        self.url_sync.apply_inbound();
        self.flush();
    }

    /// Read a dotted path out of a namespace; tests use this to observe
    /// state.
    pub fn read(&self, root: &str, path: &str) -> Value {
        let handle = if path.is_empty() {
            Handle::root(root)
        } else {
            Handle::root(root).join_path(path.split('.'))
        };
        self.substrate.read(&handle)
    }

    pub fn write(&self, root: &str, path: &str, value: Value) {
        let handle = Handle::root(root).join_path(path.split('.'));
        self.substrate.write(&handle, value);
    }
}
