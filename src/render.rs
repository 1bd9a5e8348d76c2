//! The renderer: a recursive walk over authored template trees producing
//! virtual nodes.
//!
//! Per element the reserved attributes apply in a fixed order — `import`,
//! `init`, `def`, `test`, then everything else — before children render.
//! Sibling traversal carries a conditional-chain context so `<when>`/`<else>`
//! branches (and zero-row loops) coordinate, and iteration expansion threads
//! the row marker into the SIDs of the template's immediate children.

use crate::compile::ExprCompiler;
use crate::component::{self, ComponentDef, SlotCtx};
use crate::error::RuntimeError;
use crate::form;
use crate::handle::{Handle, Mode};
use crate::parse::{ElementNode, RootSpec, TemplateNode, ROOT_TAG, SETUP_TAG, SLOT_SUFFIX, TEMPLATE_SUFFIX};
use crate::scope::{apply_defs, apply_imports, Scope};
use crate::sid::{child_sid, local_ns};
use crate::substrate::Substrate;
use crate::value::{is_boolean_attr_falsy, is_truthy, stable_stringify};
use crate::vdom::{self, chain_event, EventHandler, VNode};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub const URL_TAG: &str = "weft-url";

lazy_static! {
    static ref RESERVED_ATTRS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("import");
        s.insert("init");
        s.insert("def");
        s.insert("test");
        s.insert("each");
        s.insert("params");
        s.insert("bind");
        s.insert("marker");
        s.insert("clear-on-unmount");
        s
    };

    static ref BOOLEAN_ATTRS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("checked");
        s.insert("disabled");
        s.insert("selected");
        s.insert("readonly");
        s.insert("required");
        s.insert("multiple");
        s.insert("hidden");
        s.insert("open");
        s.insert("autofocus");
        s
    };

    static ref EACH_BINDING_RE: Regex =
        Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)(?:\s+as\s+([A-Za-z]+))?$").unwrap();
}

/// Per-walk rendering context. Cheap to clone: scope and slot context are
/// reference-counted.
#[derive(Clone)]
pub struct Ctx {
    pub scope: Rc<Scope>,
    pub parent_sid: String,
    /// Row marker when the nodes being rendered are the immediate children
    /// of an iteration expansion; empty otherwise.
    pub iter_key: String,
    pub form: Option<Handle>,
    pub slots: Option<Rc<SlotCtx>>,
    /// Name of the component whose template is being rendered; matches the
    /// default slot.
    pub slot_owner: Option<String>,
}

impl Ctx {
    pub fn top(scope: Rc<Scope>, parent_sid: String) -> Self {
        Ctx {
            scope,
            parent_sid,
            iter_key: String::new(),
            form: None,
            slots: None,
            slot_owner: None,
        }
    }
}

/// The renderer owns the compiler and per-page render bookkeeping; the
/// substrate is injected at construction.
pub struct Renderer {
    pub substrate: Rc<Substrate>,
    pub compiler: ExprCompiler,
    pub components: RefCell<HashMap<String, Rc<ComponentDef>>>,
    init_done: RefCell<HashSet<String>>,
    clear_on_unmount: RefCell<HashSet<String>>,
    seen_sids: RefCell<HashSet<String>>,
}

impl Renderer {
    pub fn new(substrate: Rc<Substrate>) -> Rc<Self> {
        Rc::new(Renderer {
            substrate,
            compiler: ExprCompiler::new(),
            components: RefCell::new(HashMap::new()),
            init_done: RefCell::new(HashSet::new()),
            clear_on_unmount: RefCell::new(HashSet::new()),
            seen_sids: RefCell::new(HashSet::new()),
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Evaluation conveniences
    // ───────────────────────────────────────────────────────────────────────

    pub fn eval_pure(&self, body: &str, scope: &Rc<Scope>) -> Result<Value, RuntimeError> {
        self.compiler
            .evaluate(body, &scope.flatten(), Mode::Pure, &self.substrate)
    }

    /// Interpolated text; segment errors render as bracketed markers.
    pub fn text(&self, text: &str, scope: &Rc<Scope>) -> String {
        self.compiler
            .interpolate_text(text, &scope.flatten(), &self.substrate)
    }

    /// Value-preserving interpolation; errors propagate.
    pub fn value(&self, text: &str, scope: &Rc<Scope>) -> Result<Value, RuntimeError> {
        self.compiler
            .interpolate_value(text, &scope.flatten(), &self.substrate)
    }

    /// A fresh top-level scope carrying the global and URL handles.
    pub fn base_scope(&self) -> Rc<Scope> {
        let scope = Scope::new();
        scope
            .bind_handle("Global", Handle::root("global"))
            .expect("empty frame");
        scope
            .bind_handle("Url", Handle::root("url"))
            .expect("empty frame");
        scope
    }

    // ───────────────────────────────────────────────────────────────────────
    // Pass bookkeeping
    // ───────────────────────────────────────────────────────────────────────

    pub fn begin_pass(&self) {
        self.seen_sids.borrow_mut().clear();
    }

    pub fn note_sid(&self, sid: &str) {
        self.seen_sids.borrow_mut().insert(sid.to_string());
    }

    /// After a pass: drop local namespaces of `clear-on-unmount` elements
    /// that no longer rendered.
    pub fn sweep(&self) {
        let seen = self.seen_sids.borrow();
        let mut registry = self.clear_on_unmount.borrow_mut();
        let gone: Vec<String> = registry.iter().filter(|s| !seen.contains(*s)).cloned().collect();
        for sid in gone {
            self.substrate.remove_namespace(&local_ns(&sid));
            self.init_done.borrow_mut().remove(&sid);
            registry.remove(&sid);
        }
    }

    /// Evaluate an `init` attribute once per SID. The result must be an
    /// object; it seeds the SID's local namespace.
    pub fn run_init_once(
        &self,
        sid: &str,
        init: &str,
        scope: &Rc<Scope>,
    ) -> Result<(), RuntimeError> {
        if self.init_done.borrow().contains(sid) {
            return Ok(());
        }
        let value = self.value(init, scope)?;
        if !value.is_object() {
            return Err(RuntimeError::init_shape(format!(
                "init must evaluate to an object, got '{}'.",
                value
            )));
        }
        self.substrate.namespace_with_init(&local_ns(sid), value);
        self.init_done.borrow_mut().insert(sid.to_string());
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────
    // SID and reserved attributes
    // ───────────────────────────────────────────────────────────────────────

    /// The SID of an element in context: explicit `marker` attribute wins
    /// over the source segment; the iteration key applies only at the
    /// expansion boundary.
    pub fn sid_for(&self, el: &ElementNode, ctx: &Ctx) -> String {
        let segment = match el.attr("marker") {
            Some(marker) => self.text(marker, &ctx.scope),
            None => el.segment.clone(),
        };
        child_sid(&ctx.parent_sid, &segment, &ctx.iter_key)
    }

    /// Fork the scope and apply `import`, `init`, `def` in order. `test` is
    /// the caller's next step.
    fn process_reserved(
        &self,
        el: &ElementNode,
        ctx: &Ctx,
        sid: &str,
    ) -> Result<Rc<Scope>, RuntimeError> {
        let scope = ctx.scope.fork();
        if let Some(imports) = el.attr("import") {
            apply_imports(imports, &scope);
        }
        if let Some(init) = el.attr("init") {
            self.run_init_once(sid, init, &scope)?;
        }
        if let Some(defs) = el.attr("def") {
            apply_defs(defs, &scope, self, sid)?;
        }
        Ok(scope)
    }

    fn test_passes(&self, el: &ElementNode, scope: &Rc<Scope>) -> Result<bool, RuntimeError> {
        match el.attr("test") {
            Some(test) => Ok(is_truthy(&self.value(test, scope)?)),
            None => Ok(true),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // The walk
    // ───────────────────────────────────────────────────────────────────────

    pub fn render_nodes(
        self: &Rc<Self>,
        nodes: &[TemplateNode],
        ctx: &Ctx,
    ) -> Result<Vec<VNode>, RuntimeError> {
        let mut out = Vec::new();
        // Some(matched) while a when/loop chain is open for following elses.
        let mut chain: Option<bool> = None;

        for node in nodes {
            match node {
                TemplateNode::Text(text) => {
                    out.push(VNode::Text(self.text(text, &ctx.scope)));
                    chain = None;
                }
                TemplateNode::Element(el) => match el.tag.as_str() {
                    "when" => {
                        let matched = self.render_branch(el, ctx, false, &mut out)?;
                        chain = Some(matched);
                    }
                    "else" => match chain {
                        None => {
                            return Err(RuntimeError::syntax_shape(
                                "'else' without a preceding 'when' or 'loop'.",
                            ))
                        }
                        Some(true) => {}
                        Some(false) => {
                            let matched = self.render_branch(el, ctx, true, &mut out)?;
                            chain = Some(matched);
                        }
                    },
                    "loop" => {
                        let any = self.render_loop(el, ctx, &mut out)?;
                        chain = Some(any);
                    }
                    tag => {
                        chain = None;
                        if tag == SETUP_TAG || tag == ROOT_TAG || tag.ends_with(TEMPLATE_SUFFIX) {
                            continue;
                        }
                        if tag.ends_with(SLOT_SUFFIX) {
                            out.extend(component::render_slot(self, el, ctx)?);
                            continue;
                        }
                        if tag == URL_TAG {
                            if let Some(vnode) = self.render_url_tag(el, ctx)? {
                                out.push(vnode);
                            }
                            continue;
                        }
                        let is_component = self.substrate.is_component(tag)
                            || self.components.borrow().contains_key(tag);
                        if is_component {
                            if let Some(vnode) = component::render_use_site(self, el, ctx)? {
                                out.push(vnode);
                            }
                            continue;
                        }
                        if tag == "form" {
                            if let Some(vnode) = form::render_form(self, el, ctx)? {
                                out.push(vnode);
                            }
                            continue;
                        }
                        if let Some(vnode) = self.render_element(el, ctx)? {
                            out.push(vnode);
                        }
                    }
                },
            }
        }
        Ok(out)
    }

    fn render_element(
        self: &Rc<Self>,
        el: &ElementNode,
        ctx: &Ctx,
    ) -> Result<Option<VNode>, RuntimeError> {
        let sid = self.sid_for(el, ctx);
        self.note_sid(&sid);
        let scope = self.process_reserved(el, ctx, &sid)?;
        if !self.test_passes(el, &scope)? {
            return Ok(None);
        }
        if el.has_attr("clear-on-unmount") {
            self.clear_on_unmount.borrow_mut().insert(sid.clone());
        }

        let mut velem = vdom::element(&el.tag, &sid);
        self.apply_attrs(el, &scope, &mut velem.props, &mut velem.events)?;
        form::auto_bind_field(self, el, ctx.form.as_ref(), &scope, &mut velem)?;

        let mut child_ctx = ctx.clone();
        child_ctx.scope = scope;
        child_ctx.parent_sid = sid;
        child_ctx.iter_key = String::new();
        velem.children = self.render_nodes(&el.children, &child_ctx)?;
        Ok(Some(VNode::Element(velem)))
    }

    /// One branch of a conditional chain. The branch element keeps its own
    /// source-position SID whether or not it renders.
    fn render_branch(
        self: &Rc<Self>,
        el: &ElementNode,
        ctx: &Ctx,
        is_else: bool,
        out: &mut Vec<VNode>,
    ) -> Result<bool, RuntimeError> {
        let sid = self.sid_for(el, ctx);
        self.note_sid(&sid);
        let scope = self.process_reserved(el, ctx, &sid)?;

        if !is_else && el.attr("test").is_none() {
            return Err(RuntimeError::syntax_shape("'when' requires a test attribute."));
        }
        if !self.test_passes(el, &scope)? {
            return Ok(false);
        }

        let mut child_ctx = ctx.clone();
        child_ctx.scope = scope;
        child_ctx.parent_sid = sid;
        child_ctx.iter_key = String::new();
        out.extend(self.render_nodes(&el.children, &child_ctx)?);
        Ok(true)
    }

    /// A URL annotation: emits a neutral container carrying the key lists as
    /// data attributes for the synchronizer to discover.
    fn render_url_tag(
        self: &Rc<Self>,
        el: &ElementNode,
        ctx: &Ctx,
    ) -> Result<Option<VNode>, RuntimeError> {
        let sid = self.sid_for(el, ctx);
        self.note_sid(&sid);
        let scope = self.process_reserved(el, ctx, &sid)?;
        if !self.test_passes(el, &scope)? {
            return Ok(None);
        }

        let mut velem = vdom::element("w-url", &sid);
        for (attr, data) in [("include", "data-included"), ("transient", "data-transient")] {
            if let Some(list) = el.attr(attr) {
                let normalized = list
                    .split(',')
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .collect::<Vec<_>>()
                    .join(",");
                velem
                    .props
                    .insert(data.to_string(), Value::String(normalized));
            }
        }

        let mut child_ctx = ctx.clone();
        child_ctx.scope = scope;
        child_ctx.parent_sid = sid;
        child_ctx.iter_key = String::new();
        velem.children = self.render_nodes(&el.children, &child_ctx)?;
        Ok(Some(VNode::Element(velem)))
    }

    // ───────────────────────────────────────────────────────────────────────
    // Attributes and events
    // ───────────────────────────────────────────────────────────────────────

    pub(crate) fn apply_attrs(
        self: &Rc<Self>,
        el: &ElementNode,
        scope: &Rc<Scope>,
        props: &mut std::collections::BTreeMap<String, Value>,
        events: &mut HashMap<String, EventHandler>,
    ) -> Result<(), RuntimeError> {
        let flat = scope.flatten();
        for (name, raw) in &el.attrs {
            if RESERVED_ATTRS.contains(name.as_str()) {
                continue;
            }
            if name.starts_with("on") && name.len() > 2 {
                let trimmed = raw.trim();
                if trimmed.starts_with("@{") && trimmed.ends_with('}') {
                    let body = trimmed[2..trimmed.len() - 1].to_string();
                    let handler = self.make_effect_handler(&body, scope);
                    chain_event(events, &name[2..], handler);
                    continue;
                }
            }

            let parsed = self.compiler.parse_interpolation(raw, &flat);
            if parsed.lone {
                let value = self.compiler.interpolate_value(raw, &flat, &self.substrate)?;
                if BOOLEAN_ATTRS.contains(name.as_str()) {
                    if !is_boolean_attr_falsy(&value) {
                        props.insert(name.clone(), Value::Bool(true));
                    }
                } else if !value.is_null() {
                    props.insert(name.clone(), value);
                }
            } else {
                let text = self.compiler.interpolate_text(raw, &flat, &self.substrate);
                props.insert(name.clone(), Value::String(text));
            }
        }
        Ok(())
    }

    /// An `on*` handler: fork the scope, bind the event under the reserved
    /// name, evaluate the body in effect mode.
    pub(crate) fn make_effect_handler(self: &Rc<Self>, body: &str, scope: &Rc<Scope>) -> EventHandler {
        let weak = Rc::downgrade(self);
        let scope = scope.clone();
        let body = body.to_string();
        Rc::new(move |event: &Value| {
            let Some(renderer) = weak.upgrade() else {
                return;
            };
            let forked = scope.fork();
            if forked.bind_value("$Event", event.clone()).is_err() {
                return;
            }
            let flat = forked.flatten();
            if let Err(err) =
                renderer
                    .compiler
                    .evaluate(&body, &flat, Mode::Effect, &renderer.substrate)
            {
                tracing::warn!(code = %err.code, "effect handler '{}' failed: {}", body, err.message);
            }
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Iteration
    // ───────────────────────────────────────────────────────────────────────

    /// Expand a `loop` element. Returns whether any row rendered, feeding
    /// the conditional chain so a trailing `else` can act as the empty case.
    fn render_loop(
        self: &Rc<Self>,
        el: &ElementNode,
        ctx: &Ctx,
        out: &mut Vec<VNode>,
    ) -> Result<bool, RuntimeError> {
        let sid = self.sid_for(el, ctx);
        self.note_sid(&sid);
        let scope = self.process_reserved(el, ctx, &sid)?;
        if !self.test_passes(el, &scope)? {
            return Ok(false);
        }

        let each = el
            .attr("each")
            .ok_or_else(|| RuntimeError::syntax_shape("'loop' requires an each attribute."))?;
        let spec = parse_each(each, self, &scope)?;
        let collection = self.eval_pure(&spec.source, &scope)?;

        // (field key, value) rows in insertion order; arrays key by position.
        let rows: Vec<(Option<String>, Value)> = match &collection {
            Value::Array(items) => items.iter().map(|v| (None, v.clone())).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (Some(k.clone()), v.clone()))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(RuntimeError::eval(format!(
                    "each expects an array or object, got '{}'.",
                    other
                )))
            }
        };
        let is_object = collection.is_object();

        match spec.marker {
            MarkerKind::Index if is_object => {
                return Err(RuntimeError::syntax_shape(
                    "'marked by index' is only valid for arrays.",
                ))
            }
            MarkerKind::Field if !is_object => {
                return Err(RuntimeError::syntax_shape(
                    "'marked by field' is only valid for objects.",
                ))
            }
            _ => {}
        }

        let mut seen_markers = HashSet::new();
        let count = rows.len();
        for (index, (field, value)) in rows.into_iter().enumerate() {
            let row_scope = scope.fork();
            for (var, role) in &spec.bindings {
                let bound = match role {
                    Role::Value => value.clone(),
                    Role::Index => Value::Number(index.into()),
                    Role::Field => match &field {
                        Some(key) => Value::String(key.clone()),
                        None => {
                            return Err(RuntimeError::syntax_shape(
                                "'as field' is only valid for objects.",
                            ))
                        }
                    },
                    Role::IsFirst => Value::Bool(index == 0),
                    Role::IsLast => Value::Bool(index + 1 == count),
                };
                row_scope.bind_value(var, bound)?;
            }

            let marker = match &spec.marker {
                MarkerKind::Index => index.to_string(),
                MarkerKind::Field => field.clone().unwrap_or_default(),
                MarkerKind::Expr(body) => {
                    stable_stringify(&self.eval_pure(body, &row_scope)?)
                }
            };
            if !seen_markers.insert(marker.clone()) {
                return Err(RuntimeError::duplicate_marker(format!(
                    "Iteration produced marker '{}' twice.",
                    marker
                )));
            }

            let mut row_ctx = ctx.clone();
            row_ctx.scope = row_scope;
            row_ctx.parent_sid = sid.clone();
            row_ctx.iter_key = marker;
            out.extend(self.render_nodes(&el.children, &row_ctx)?);
        }

        Ok(count > 0)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Roots
    // ───────────────────────────────────────────────────────────────────────

    /// Render one declarative root: top scope with the global and URL
    /// handles, root reserved attributes in element order, then children.
    pub fn render_root(self: &Rc<Self>, spec: &RootSpec) -> Result<Vec<VNode>, RuntimeError> {
        let root_id = spec
            .attrs
            .iter()
            .find(|(n, _)| n == "id")
            .map(|(_, v)| v.clone());
        let segment = root_id.unwrap_or_else(|| format!("{}#{}", ROOT_TAG, spec.index));
        let sid = child_sid("", &segment, "");
        self.note_sid(&sid);

        let scope = self.base_scope().fork();
        let attr = |name: &str| {
            spec.attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };
        if let Some(imports) = attr("import") {
            apply_imports(imports, &scope);
        }
        if let Some(init) = attr("init") {
            self.run_init_once(&sid, init, &scope)?;
        }
        if let Some(defs) = attr("def") {
            apply_defs(defs, &scope, self, &sid)?;
        }

        let ctx = Ctx::top(scope, sid);
        self.render_nodes(&spec.nodes, &ctx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EACH GRAMMAR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Role {
    Value,
    Index,
    Field,
    IsFirst,
    IsLast,
}

#[derive(Debug, Clone)]
pub(crate) enum MarkerKind {
    Expr(String),
    Index,
    Field,
}

pub(crate) struct EachSpec {
    pub bindings: Vec<(String, Role)>,
    pub source: String,
    pub marker: MarkerKind,
}

/// Parse `BINDINGS of {EXPR} marked by MARKER`. The source expression uses
/// the first-that-compiles probe, so unbalanced braces inside it are fine.
pub(crate) fn parse_each(
    text: &str,
    renderer: &Renderer,
    scope: &Rc<Scope>,
) -> Result<EachSpec, RuntimeError> {
    let of_pos = text
        .find(" of ")
        .ok_or_else(|| RuntimeError::syntax_shape("each requires 'of'."))?;
    let bindings_str = &text[..of_pos];
    let rest = text[of_pos + 4..].trim_start();

    let mut bindings = Vec::new();
    for part in bindings_str.split(',') {
        let part = part.trim();
        let caps = EACH_BINDING_RE.captures(part).ok_or_else(|| {
            RuntimeError::syntax_shape(format!("Bad each binding '{}'.", part))
        })?;
        let var = format!("${}", &caps[1]);
        let role = match caps.get(2).map(|m| m.as_str()) {
            None | Some("value") => Role::Value,
            Some("index") => Role::Index,
            Some("field") => Role::Field,
            Some("isFirst") => Role::IsFirst,
            Some("isLast") => Role::IsLast,
            Some(other) => {
                return Err(RuntimeError::syntax_shape(format!(
                    "Unknown each role '{}'.",
                    other
                )))
            }
        };
        if bindings.iter().any(|(_, r)| *r == role) {
            return Err(RuntimeError::syntax_shape(format!(
                "Duplicate each role in '{}'.",
                text
            )));
        }
        bindings.push((var, role));
    }
    if bindings.is_empty() {
        return Err(RuntimeError::syntax_shape("each requires at least one binding."));
    }

    let flat = scope.flatten();
    let (source, consumed) = renderer
        .compiler
        .probe(rest, &flat)
        .ok_or_else(|| RuntimeError::syntax_shape("each requires 'of {expression}'."))?;

    let tail = rest[consumed..].trim_start();
    let marker_text = tail
        .strip_prefix("marked by")
        .ok_or_else(|| RuntimeError::syntax_shape("each requires 'marked by'."))?
        .trim();

    let marker = if marker_text == "index" {
        MarkerKind::Index
    } else if marker_text == "field" {
        MarkerKind::Field
    } else if marker_text.starts_with('{') {
        let (body, used) = renderer
            .compiler
            .probe(marker_text, &flat)
            .ok_or_else(|| RuntimeError::syntax_shape("Bad 'marked by' expression."))?;
        if !marker_text[used..].trim().is_empty() {
            return Err(RuntimeError::syntax_shape(
                "Trailing content after 'marked by' expression.",
            ));
        }
        MarkerKind::Expr(body)
    } else {
        return Err(RuntimeError::syntax_shape(format!(
            "Bad marker '{}': expected an expression, 'index', or 'field'.",
            marker_text
        )));
    };

    Ok(EachSpec {
        bindings,
        source,
        marker,
    })
}
