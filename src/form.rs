//! Form binding.
//!
//! A form binds a state namespace — its own SID-keyed local namespace by
//! default, or a caller-provided handle via `bind` — into scope as `@Form`.
//! Child fields auto-bind by their `name` attribute with input-type-specific
//! read/write semantics; a field's own `bind` overrides the derivation.
//! Submission is always intercepted: the mount layer's contract is to call
//! `preventDefault` before dispatching the `submit` wrapper, which runs the
//! author's handler if one exists.

use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::parse::ElementNode;
use crate::render::{Ctx, Renderer};
use crate::scope::{apply_defs, apply_imports, resolve_handle_expr};
use crate::sid::local_ns;
use crate::value::{is_truthy, values_equal};
use crate::vdom::{self, chain_event, EventHandler, VElement, VNode};
use serde_json::Value;
use std::rc::Rc;

pub fn render_form(
    renderer: &Rc<Renderer>,
    el: &ElementNode,
    ctx: &Ctx,
) -> Result<Option<VNode>, RuntimeError> {
    let sid = renderer.sid_for(el, ctx);
    renderer.note_sid(&sid);

    let scope = ctx.scope.fork();
    if let Some(imports) = el.attr("import") {
        apply_imports(imports, &scope);
    }

    let handle = match el.attr("bind") {
        Some(expr) => {
            if el.attr("init").is_some() {
                return Err(RuntimeError::init_shape(
                    "init is not allowed on a bound form.",
                ));
            }
            resolve_handle_expr(expr, &ctx.scope.flatten())?
        }
        None => {
            renderer.substrate.namespace(&local_ns(&sid));
            if let Some(init) = el.attr("init") {
                renderer.run_init_once(&sid, init, &scope)?;
            }
            Handle::root(local_ns(&sid))
        }
    };
    scope.bind_handle("Form", handle.clone())?;

    if let Some(defs) = el.attr("def") {
        apply_defs(defs, &scope, renderer, &sid)?;
    }
    if let Some(test) = el.attr("test") {
        if !is_truthy(&renderer.value(test, &scope)?) {
            return Ok(None);
        }
    }

    let mut velem = vdom::element("form", &sid);
    renderer.apply_attrs(el, &scope, &mut velem.props, &mut velem.events)?;

    // Interception: a submit wrapper is always present, wrapping the author
    // handler when one was installed by apply_attrs.
    match velem.events.remove("submit") {
        Some(author) => {
            let wrapper: EventHandler = Rc::new(move |ev: &Value| author(ev));
            velem.events.insert("submit".to_string(), wrapper);
        }
        None => {
            velem
                .events
                .insert("submit".to_string(), Rc::new(|_: &Value| {}));
        }
    }

    let mut child_ctx = ctx.clone();
    child_ctx.scope = scope;
    child_ctx.parent_sid = sid;
    child_ctx.iter_key = String::new();
    child_ctx.form = Some(handle);
    velem.children = renderer.render_nodes(&el.children, &child_ctx)?;
    Ok(Some(VNode::Element(velem)))
}

/// Wire a field element. Applies only to inputs, textareas, selects, and
/// custom elements (dashed tag names). Inside a form the field's `name`
/// derives `@Form.name`; an explicit `bind` overrides that and also works
/// without an enclosing form. Anything else stays unbound.
pub fn auto_bind_field(
    renderer: &Rc<Renderer>,
    el: &ElementNode,
    form_handle: Option<&Handle>,
    scope: &Rc<crate::scope::Scope>,
    velem: &mut VElement,
) -> Result<(), RuntimeError> {
    let tag = el.tag.as_str();
    let is_custom = tag.contains('-');
    if !(tag == "input" || tag == "textarea" || tag == "select" || is_custom) {
        return Ok(());
    }

    let field_handle = match el.attr("bind") {
        Some(expr) => resolve_handle_expr(expr, &scope.flatten())?,
        None => match (form_handle, el.attr("name")) {
            (Some(form), Some(name)) => form.join(name),
            _ => return Ok(()),
        },
    };
    let current = renderer.substrate.read(&field_handle);

    // Custom elements get the value property and no auto-wired events.
    if is_custom {
        velem.props.insert("value".to_string(), current);
        return Ok(());
    }

    let write = |extract: Box<dyn Fn(&Value) -> Option<Value>>| -> EventHandler {
        let weak = Rc::downgrade(renderer);
        let handle = field_handle.clone();
        Rc::new(move |ev: &Value| {
            let Some(renderer) = weak.upgrade() else {
                return;
            };
            if let Some(value) = extract(ev) {
                renderer.substrate.write(&handle, value);
            }
        })
    };

    match tag {
        "input" => match el.attr("type").unwrap_or("text") {
            "checkbox" => {
                velem
                    .props
                    .insert("checked".to_string(), Value::Bool(is_truthy(&current)));
                chain_event(
                    &mut velem.events,
                    "change",
                    write(Box::new(|ev| {
                        Some(Value::Bool(is_truthy(ev.get("checked").unwrap_or(&Value::Null))))
                    })),
                );
            }
            "radio" => {
                let own = Value::String(el.attr("value").unwrap_or_default().to_string());
                velem
                    .props
                    .insert("checked".to_string(), Value::Bool(values_equal(&current, &own)));
                let own_value = own.clone();
                chain_event(
                    &mut velem.events,
                    "change",
                    write(Box::new(move |ev| {
                        let checked = ev.get("checked").map(is_truthy).unwrap_or(false);
                        checked.then(|| own_value.clone())
                    })),
                );
            }
            "file" => {
                chain_event(
                    &mut velem.events,
                    "change",
                    write(Box::new(|ev| ev.get("files").cloned())),
                );
            }
            _ => {
                velem.props.insert(
                    "value".to_string(),
                    if current.is_null() {
                        Value::String(String::new())
                    } else {
                        current
                    },
                );
                let handler = write(Box::new(|ev| ev.get("value").cloned()));
                chain_event(&mut velem.events, "input", handler.clone());
                chain_event(&mut velem.events, "change", handler);
            }
        },
        "textarea" => {
            velem.props.insert(
                "value".to_string(),
                if current.is_null() {
                    Value::String(String::new())
                } else {
                    current
                },
            );
            let handler = write(Box::new(|ev| ev.get("value").cloned()));
            chain_event(&mut velem.events, "input", handler.clone());
            chain_event(&mut velem.events, "change", handler);
        }
        "select" => {
            if el.has_attr("multiple") {
                chain_event(
                    &mut velem.events,
                    "change",
                    write(Box::new(|ev| ev.get("selected").cloned())),
                );
            } else {
                velem.props.insert(
                    "value".to_string(),
                    if current.is_null() {
                        Value::String(String::new())
                    } else {
                        current
                    },
                );
                chain_event(
                    &mut velem.events,
                    "change",
                    write(Box::new(|ev| ev.get("value").cloned())),
                );
            }
        }
        _ => {}
    }

    Ok(())
}
