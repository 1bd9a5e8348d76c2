//! Component definitions, use-site expansion, and slot projection.
//!
//! A `NAME:template` definition captures its parameter list, optional
//! template-level init, and child template nodes. A use-site binds value and
//! handle parameters in the caller's scope, classifies its children into
//! slots (named slots render in the caller's scope), and expands the
//! template in a fresh scope carrying the component's self-handle. The
//! expansion is an error boundary: a failure inside it renders as an
//! error-indicator node instead of taking down the page.

use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::parse::{ElementNode, TemplateNode, TemplateSpec, SLOT_SUFFIX};
use crate::render::{Ctx, Renderer};
use crate::scope::{resolve_handle_expr, Scope};
use crate::sid::{child_sid, local_ns};
use crate::substrate::error_node;
use crate::value::is_truthy;
use crate::vdom::{self, VComponent, VNode};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

pub struct ComponentDef {
    /// Lower-cased tag name; author references resolve case-insensitively.
    pub name: String,
    /// Declared value parameters, `$` sigil included.
    pub value_params: Vec<String>,
    /// Declared handle parameters, `@` sigil stripped.
    pub handle_params: Vec<String>,
    pub init: Option<String>,
    pub nodes: Vec<TemplateNode>,
    /// Named slots the template declares (everything but the default).
    pub slot_names: HashSet<String>,
}

/// Pre-rendered slot contents for one expansion. An empty default means the
/// caller provided nothing and the template fallback applies.
#[derive(Default)]
pub struct SlotCtx {
    pub named: HashMap<String, Vec<VNode>>,
    pub default: Vec<VNode>,
}

/// Register a lifted template definition with the renderer and the
/// substrate's component registry.
pub fn register_template(renderer: &Renderer, spec: TemplateSpec) -> Result<(), RuntimeError> {
    let mut value_params = Vec::new();
    let mut handle_params = Vec::new();
    if let Some(params) = &spec.params {
        for part in params.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(name) = part.strip_prefix('$') {
                value_params.push(format!("${}", name));
            } else if let Some(name) = part.strip_prefix('@') {
                handle_params.push(name.to_string());
            } else {
                return Err(RuntimeError::syntax_shape(format!(
                    "Component parameter '{}' must start with '$' or '@'.",
                    part
                )));
            }
        }
    }

    let mut slot_names = HashSet::new();
    collect_slot_names(&spec.nodes, &spec.name, &mut slot_names);

    let def = Rc::new(ComponentDef {
        name: spec.name.clone(),
        value_params,
        handle_params,
        init: spec.init,
        nodes: spec.nodes,
        slot_names,
    });
    renderer.substrate.register_component(&spec.name);
    renderer.components.borrow_mut().insert(spec.name, def);
    Ok(())
}

fn collect_slot_names(nodes: &[TemplateNode], component: &str, out: &mut HashSet<String>) {
    for node in nodes {
        if let TemplateNode::Element(el) = node {
            if let Some(name) = el.tag.strip_suffix(SLOT_SUFFIX) {
                if !name.eq_ignore_ascii_case(component) {
                    out.insert(name.to_string());
                }
            }
            collect_slot_names(&el.children, component, out);
        }
    }
}

/// Expand a component use-site into a component virtual node, or nothing
/// when its `test` fails.
pub fn render_use_site(
    renderer: &Rc<Renderer>,
    el: &ElementNode,
    ctx: &Ctx,
) -> Result<Option<VNode>, RuntimeError> {
    let def = renderer
        .components
        .borrow()
        .get(&el.tag)
        .cloned()
        .ok_or_else(|| {
            RuntimeError::template_not_found(format!("No template registered for '{}'.", el.tag))
        })?;

    let sid = renderer.sid_for(el, ctx);
    renderer.note_sid(&sid);

    let use_init = el.attr("init");
    if use_init.is_some() && def.init.is_some() {
        return Err(RuntimeError::init_shape(format!(
            "init declared on both the '{}' template and its use-site.",
            def.name
        )));
    }

    // The per-node attribute order applies to use-sites too: a falsy test,
    // evaluated in the caller's scope, skips the subtree before any
    // parameter binding or expansion.
    if let Some(test) = el.attr("test") {
        if !is_truthy(&renderer.value(test, &ctx.scope)?) {
            return Ok(None);
        }
    }

    // Parameter and passthrough classification, in the caller's scope.
    let caller_flat = ctx.scope.flatten();
    let mut value_bindings: Vec<(String, Value)> = Vec::new();
    let mut handle_bindings: Vec<(String, Handle)> = Vec::new();
    let mut passthrough: BTreeMap<String, Value> = BTreeMap::new();
    for (attr_name, raw) in &el.attrs {
        if is_reserved_attr(attr_name) {
            continue;
        }
        if let Some(param) = def
            .value_params
            .iter()
            .find(|p| p[1..].eq_ignore_ascii_case(attr_name))
        {
            let parsed = renderer.compiler.parse_interpolation(raw, &caller_flat);
            let value = if parsed.lone {
                renderer
                    .compiler
                    .interpolate_value(raw, &caller_flat, &renderer.substrate)?
            } else {
                Value::String(raw.clone())
            };
            value_bindings.push((param.clone(), value));
        } else if let Some(param) = def
            .handle_params
            .iter()
            .find(|p| p.eq_ignore_ascii_case(attr_name))
        {
            let handle = resolve_handle_expr(raw, &caller_flat)?;
            handle_bindings.push((param.clone(), handle));
        } else {
            passthrough.insert(attr_name.clone(), Value::String(raw.clone()));
        }
    }

    // Children classify into slots; all slot content renders in the
    // caller's scope.
    let mut slot_ctx = SlotCtx::default();
    let mut default_children: Vec<&TemplateNode> = Vec::new();
    for child in &el.children {
        match child {
            TemplateNode::Element(c) if def.slot_names.contains(&c.tag) => {
                let wrapper_sid = child_sid(&sid, &c.segment, "");
                let mut slot_render_ctx = ctx.clone();
                slot_render_ctx.parent_sid = wrapper_sid;
                slot_render_ctx.iter_key = String::new();
                let rendered = renderer.render_nodes(&c.children, &slot_render_ctx)?;
                slot_ctx
                    .named
                    .entry(c.tag.clone())
                    .or_insert_with(Vec::new)
                    .extend(rendered);
            }
            other => default_children.push(other),
        }
    }
    {
        let owned: Vec<TemplateNode> = default_children.into_iter().cloned().collect();
        let mut default_render_ctx = ctx.clone();
        default_render_ctx.parent_sid = sid.clone();
        default_render_ctx.iter_key = String::new();
        slot_ctx.default = renderer.render_nodes(&owned, &default_render_ctx)?;
    }

    // The fresh expansion scope: self-handle, global/url, parameters. The
    // expansion is a component boundary — failures render in place.
    let slots = Rc::new(slot_ctx);
    let expansion: Result<Vec<VNode>, RuntimeError> = (|| {
        let scope = Scope::new();
        scope.bind_handle(&def.name, Handle::root(local_ns(&sid)))?;
        scope.bind_handle("Global", Handle::root("global"))?;
        scope.bind_handle("Url", Handle::root("url"))?;
        for (name, value) in &value_bindings {
            scope.bind_value(name, value.clone())?;
        }
        for (name, handle) in &handle_bindings {
            scope.bind_handle(name, handle.clone())?;
        }

        if let Some(init) = use_init {
            renderer.run_init_once(&sid, init, &ctx.scope)?;
        } else if let Some(init) = &def.init {
            renderer.run_init_once(&sid, init, &scope)?;
        }

        let mut inner_ctx = Ctx::top(scope, sid.clone());
        inner_ctx.slots = Some(slots.clone());
        inner_ctx.slot_owner = Some(def.name.clone());
        renderer.render_nodes(&def.nodes, &inner_ctx)
    })();

    let children = match expansion {
        Ok(children) => children,
        Err(err) => {
            tracing::warn!(code = %err.code, "component '{}' failed to expand: {}", def.name, err.message);
            vec![error_node(&err)]
        }
    };

    let params: BTreeMap<String, Value> = value_bindings.into_iter().collect();
    let handle_params: BTreeMap<String, Handle> = handle_bindings.into_iter().collect();

    Ok(Some(VNode::Component(VComponent {
        name: def.name.clone(),
        sid,
        params,
        handle_params,
        passthrough,
        children,
    })))
}

/// Expand a template-side slot tag: provided content if the context has it,
/// else the tag's own fallback children, wrapped in a neutral container
/// keyed by the slot's SID.
pub fn render_slot(
    renderer: &Rc<Renderer>,
    el: &ElementNode,
    ctx: &Ctx,
) -> Result<Vec<VNode>, RuntimeError> {
    let sid = renderer.sid_for(el, ctx);
    renderer.note_sid(&sid);
    let name = el.tag.strip_suffix(SLOT_SUFFIX).unwrap_or(&el.tag);

    let provided: Option<Vec<VNode>> = match &ctx.slots {
        Some(slots) => {
            let is_default = ctx
                .slot_owner
                .as_deref()
                .map(|owner| owner.eq_ignore_ascii_case(name))
                .unwrap_or(false);
            if is_default {
                if slots.default.is_empty() {
                    None
                } else {
                    Some(slots.default.clone())
                }
            } else {
                slots.named.get(name).cloned()
            }
        }
        None => None,
    };

    let content = match provided {
        Some(content) => content,
        None => {
            // Template-side fallback, rendered in the template's scope.
            let mut fallback_ctx = ctx.clone();
            fallback_ctx.parent_sid = sid.clone();
            fallback_ctx.iter_key = String::new();
            renderer.render_nodes(&el.children, &fallback_ctx)?
        }
    };

    let mut container = vdom::element("w-slot", &sid);
    container.children = content;
    Ok(vec![VNode::Element(container)])
}

fn is_reserved_attr(name: &str) -> bool {
    matches!(
        name,
        "import" | "init" | "def" | "test" | "each" | "params" | "bind" | "marker"
            | "clear-on-unmount"
    )
}
