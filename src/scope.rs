//! Lexical scopes: chains of frames holding `$`-value bindings, handle
//! aliases, and imported external identifier names.
//!
//! `$`-values and handle aliases resolve case-insensitively; imports are
//! case-sensitive. Each scope caches its flattened view (parent overlaid by
//! local, shadowing case-insensitively); any local mutation invalidates the
//! cache. The flattened view also carries the handle signature — the sorted
//! upper-cased alias names — which keys the expression cache.

use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::render::Renderer;
use crate::sid::local_ns;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub struct Scope {
    parent: Option<Rc<Scope>>,
    values: RefCell<HashMap<String, Value>>,
    handles: RefCell<HashMap<String, Handle>>,
    imports: RefCell<HashSet<String>>,
    flat: RefCell<Option<Rc<FlatScope>>>,
}

/// Flattened view of a scope chain. Keys are upper-case folded; the original
/// author spelling travels alongside for parameter construction.
pub struct FlatScope {
    pub values: HashMap<String, (String, Value)>,
    pub handles: HashMap<String, (String, Handle)>,
    pub imports: HashSet<String>,
    pub signature: String,
}

impl FlatScope {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(&name.to_uppercase()).map(|(_, v)| v)
    }

    pub fn handle(&self, name: &str) -> Option<&Handle> {
        self.handles.get(&name.to_uppercase()).map(|(_, h)| h)
    }

    pub fn has_handle(&self, name: &str) -> bool {
        self.handles.contains_key(&name.to_uppercase())
    }
}

impl Scope {
    pub fn new() -> Rc<Self> {
        Rc::new(Scope {
            parent: None,
            values: RefCell::new(HashMap::new()),
            handles: RefCell::new(HashMap::new()),
            imports: RefCell::new(HashSet::new()),
            flat: RefCell::new(None),
        })
    }

    pub fn fork(self: &Rc<Self>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: Some(self.clone()),
            values: RefCell::new(HashMap::new()),
            handles: RefCell::new(HashMap::new()),
            imports: RefCell::new(HashSet::new()),
            flat: RefCell::new(None),
        })
    }

    /// Bind a `$`-value by its authored name (sigil included). A different
    /// spelling of an existing name in the same frame is a collision.
    pub fn bind_value(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        check_frame_collision(&self.values.borrow(), name)?;
        self.values.borrow_mut().insert(name.to_string(), value);
        self.flat.borrow_mut().take();
        Ok(())
    }

    /// Bind a handle alias by its authored name (without the `@` sigil).
    pub fn bind_handle(&self, name: &str, handle: Handle) -> Result<(), RuntimeError> {
        check_frame_collision(&self.handles.borrow(), name)?;
        self.handles.borrow_mut().insert(name.to_string(), handle);
        self.flat.borrow_mut().take();
        Ok(())
    }

    pub fn add_import(&self, name: &str) {
        self.imports.borrow_mut().insert(name.to_string());
        self.flat.borrow_mut().take();
    }

    /// Flattened view, cached until this frame mutates. Local bindings
    /// shadow parent bindings case-insensitively.
    pub fn flatten(&self) -> Rc<FlatScope> {
        if let Some(cached) = self.flat.borrow().as_ref() {
            return cached.clone();
        }

        let (mut values, mut handles, mut imports) = match &self.parent {
            Some(parent) => {
                let base = parent.flatten();
                (
                    base.values.clone(),
                    base.handles.clone(),
                    base.imports.clone(),
                )
            }
            None => (HashMap::new(), HashMap::new(), HashSet::new()),
        };

        for (name, value) in self.values.borrow().iter() {
            values.insert(name.to_uppercase(), (name.clone(), value.clone()));
        }
        for (name, handle) in self.handles.borrow().iter() {
            handles.insert(name.to_uppercase(), (name.clone(), handle.clone()));
        }
        imports.extend(self.imports.borrow().iter().cloned());

        let mut alias_names: Vec<&String> = handles.keys().collect();
        alias_names.sort();
        let signature = alias_names
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let flat = Rc::new(FlatScope {
            values,
            handles,
            imports,
            signature,
        });
        *self.flat.borrow_mut() = Some(flat.clone());
        flat
    }
}

fn check_frame_collision<T>(map: &HashMap<String, T>, name: &str) -> Result<(), RuntimeError> {
    let upper = name.to_uppercase();
    for existing in map.keys() {
        if existing != name && existing.to_uppercase() == upper {
            return Err(RuntimeError::name_collision(format!(
                "'{}' collides case-insensitively with '{}' in the same frame.",
                name, existing
            )));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION GRAMMARS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref VALUE_DEF_RE: Regex =
        Regex::new(r"(?s)^\$([A-Za-z_][A-Za-z0-9_]*)\s*:=\s*(\{.*)$").unwrap();
    static ref HANDLE_DEF_RE: Regex =
        Regex::new(r"(?s)^@([A-Za-z_][A-Za-z0-9_]*)\s*:=\s*(@.+)$").unwrap();
    static ref LOCAL_DEF_RE: Regex =
        Regex::new(r"^@([A-Za-z_][A-Za-z0-9_]*)\s+as\s+local$").unwrap();
}

/// Split a declaration list on commas outside braces, brackets and quotes.
pub fn split_declarations(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut chars = list.chars();

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_string = Some(c);
                current.push(c);
            }
            '{' | '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' | ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Apply a `def` attribute to a scope. Declarations apply in order; later
/// ones see earlier ones.
pub fn apply_defs(
    defs: &str,
    scope: &Rc<Scope>,
    renderer: &Renderer,
    sid: &str,
) -> Result<(), RuntimeError> {
    for decl in split_declarations(defs) {
        if decl.is_empty() {
            continue;
        }
        if let Some(caps) = LOCAL_DEF_RE.captures(&decl) {
            let name = caps[1].to_string();
            renderer.substrate.namespace(&local_ns(sid));
            scope.bind_handle(&name, Handle::root(local_ns(sid)))?;
        } else if let Some(caps) = VALUE_DEF_RE.captures(&decl) {
            let name = format!("${}", &caps[1]);
            let rhs = caps[2].trim().to_string();
            let flat = scope.flatten();
            let (body, consumed) = renderer.compiler.probe(&rhs, &flat).ok_or_else(|| {
                RuntimeError::syntax_shape(format!("def '{}': value is not an expression.", decl))
            })?;
            if !rhs[consumed..].trim().is_empty() {
                return Err(RuntimeError::syntax_shape(format!(
                    "def '{}': trailing content after expression.",
                    decl
                )));
            }
            let value = renderer.eval_pure(&body, scope)?;
            scope.bind_value(&name, value)?;
        } else if let Some(caps) = HANDLE_DEF_RE.captures(&decl) {
            let name = caps[1].to_string();
            let handle = resolve_handle_expr(&caps[2], &scope.flatten())?;
            scope.bind_handle(&name, handle)?;
        } else {
            return Err(RuntimeError::syntax_shape(format!(
                "Unrecognized def declaration '{}'.",
                decl
            )));
        }
    }
    Ok(())
}

/// Apply an `import` attribute: a comma-separated list of case-sensitive
/// external identifier names.
pub fn apply_imports(list: &str, scope: &Rc<Scope>) {
    for name in list.split(',') {
        let name = name.trim();
        if !name.is_empty() {
            scope.add_import(name);
        }
    }
}

/// Resolve a textual handle expression (`@Alias.path.to.place`) against a
/// flattened scope. The alias resolves case-insensitively; the appended
/// path segments stay case-sensitive.
pub fn resolve_handle_expr(text: &str, flat: &FlatScope) -> Result<Handle, RuntimeError> {
    let trimmed = text.trim();
    let stripped = trimmed.strip_prefix('@').ok_or_else(|| {
        RuntimeError::syntax_shape(format!("'{}' is not a handle expression.", trimmed))
    })?;
    let mut segments = stripped.split('.');
    let alias = segments.next().unwrap_or("");
    if alias.is_empty() {
        return Err(RuntimeError::syntax_shape(format!(
            "'{}' is not a handle expression.",
            trimmed
        )));
    }
    let base = flat
        .handle(alias)
        .ok_or_else(|| RuntimeError::unknown_ident(alias))?
        .clone();
    let mut handle = base;
    for seg in segments {
        if seg.is_empty() {
            return Err(RuntimeError::syntax_shape(format!(
                "Empty path segment in '{}'.",
                trimmed
            )));
        }
        handle = handle.join(seg);
    }
    Ok(handle)
}
