//! The expression compiler and its caches.
//!
//! Compilation turns an authored body into a callable: rewrite `@`-sigils
//! that name visible handle aliases, construct the parameter list and alias
//! map from the identifiers the rewritten body references (canonicalized to
//! upper case, authored spellings kept as alias parameters), and hand the
//! body to the installed strategy. The cache key is
//! `expression-text ‖ handle-signature` — `$`-values bind per call and
//! never widen the key.
//!
//! Interpolations use the first-that-compiles rule: author expressions may
//! contain unmatched `}` inside string or object literals, so from each `{`
//! every following `}` is tried in order and the first body the strategy
//! accepts wins. A `{` with no compiling candidate is a literal.

use crate::error::RuntimeError;
use crate::eval::{eval, EvalCtx, Slot};
use crate::expr::{parse_expression, Expr};
use crate::handle::Mode;
use crate::scope::FlatScope;
use crate::substrate::Substrate;
use crate::value::display_value;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Separator in cache keys; never appears in expression text.
const KEY_SEP: char = '\u{1}';

/// The reserved identifier prefix handle sigils rewrite to.
pub const HANDLE_PREFIX: &str = "__H_";

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGY
// ═══════════════════════════════════════════════════════════════════════════════

pub trait Callable {
    fn call(&self, ctx: &EvalCtx) -> Result<Slot, RuntimeError>;
}

/// Owns the `(parameters, body) → callable` step. The default strategy uses
/// the crate's own parser and evaluator; alternative strategies may route
/// compilation elsewhere, and runtime correctness must not depend on which
/// one is installed.
pub trait CompileStrategy {
    fn compile(&self, params: &[String], body: &str) -> Result<Rc<dyn Callable>, RuntimeError>;
}

pub struct DefaultStrategy;

struct AstCallable {
    ast: Expr,
}

impl Callable for AstCallable {
    fn call(&self, ctx: &EvalCtx) -> Result<Slot, RuntimeError> {
        eval(&self.ast, ctx)
    }
}

impl CompileStrategy for DefaultStrategy {
    fn compile(&self, _params: &[String], body: &str) -> Result<Rc<dyn Callable>, RuntimeError> {
        let ast = parse_expression(body)?;
        Ok(Rc::new(AstCallable { ast }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILED ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

pub struct CompiledEntry {
    /// Parameter names the callable was compiled against: the canonical
    /// upper-case form of every `$`-value and rewritten handle identifier
    /// the body references, plus the authored spellings (alias parameters).
    pub params: Vec<String>,
    /// Authored spellings mapped to their canonical parameter.
    pub aliases: HashMap<String, String>,
    pub callable: Rc<dyn Callable>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expr(String),
}

#[derive(Debug, Clone)]
pub struct Interpolation {
    pub segments: Vec<Segment>,
    /// True when the whole string is exactly one expression, which permits
    /// value-preserving evaluation.
    pub lone: bool,
}

pub struct ExprCompiler {
    cache: RefCell<HashMap<String, Rc<CompiledEntry>>>,
    interpolations: RefCell<HashMap<String, Rc<Interpolation>>>,
    strategy: RefCell<Rc<dyn CompileStrategy>>,
    misses: Cell<u64>,
}

impl ExprCompiler {
    pub fn new() -> Self {
        ExprCompiler {
            cache: RefCell::new(HashMap::new()),
            interpolations: RefCell::new(HashMap::new()),
            strategy: RefCell::new(Rc::new(DefaultStrategy)),
            misses: Cell::new(0),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Debug surface
    // ───────────────────────────────────────────────────────────────────────

    pub fn set_strategy(&self, strategy: Rc<dyn CompileStrategy>) {
        *self.strategy.borrow_mut() = strategy;
    }

    pub fn cache_size(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.get()
    }

    pub fn reset(&self) {
        self.cache.borrow_mut().clear();
        self.interpolations.borrow_mut().clear();
        self.misses.set(0);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Compilation
    // ───────────────────────────────────────────────────────────────────────

    pub fn compile(&self, body: &str, flat: &FlatScope) -> Result<Rc<CompiledEntry>, RuntimeError> {
        let key = format!("{}{}{}", body, KEY_SEP, flat.signature);
        if let Some(entry) = self.cache.borrow().get(&key) {
            return Ok(entry.clone());
        }

        self.misses.set(self.misses.get() + 1);
        tracing::debug!(signature = %flat.signature, "compiling expression '{}'", body);
        let rewritten = rewrite_handles(body, flat);
        let (params, aliases) = build_params(&rewritten);
        let callable = self.strategy.borrow().compile(&params, &rewritten)?;
        let entry = Rc::new(CompiledEntry {
            params,
            aliases,
            callable,
        });
        self.cache.borrow_mut().insert(key, entry.clone());
        Ok(entry)
    }

    /// Evaluate a body against a flattened scope, returning the result slot.
    pub fn evaluate_slot(
        &self,
        body: &str,
        flat: &FlatScope,
        mode: Mode,
        substrate: &Substrate,
    ) -> Result<Slot, RuntimeError> {
        let entry = self.compile(body, flat)?;
        let ctx = build_env(&entry, flat, mode, substrate);
        entry.callable.call(&ctx)
    }

    /// Evaluate a body to an owned value (handles materialize).
    pub fn evaluate(
        &self,
        body: &str,
        flat: &FlatScope,
        mode: Mode,
        substrate: &Substrate,
    ) -> Result<Value, RuntimeError> {
        let entry = self.compile(body, flat)?;
        let ctx = build_env(&entry, flat, mode, substrate);
        let slot = entry.callable.call(&ctx)?;
        Ok(ctx.materialize(&slot))
    }

    /// First-that-compiles probe. `text` must start at a `{`; returns the
    /// accepted body and the byte length consumed including both braces.
    pub fn probe(&self, text: &str, flat: &FlatScope) -> Option<(String, usize)> {
        if !text.starts_with('{') {
            return None;
        }
        for (offset, ch) in text.char_indices().skip(1) {
            if ch != '}' {
                continue;
            }
            let candidate = &text[1..offset];
            if self.compile(candidate, flat).is_ok() {
                return Some((candidate.to_string(), offset + 1));
            }
        }
        None
    }

    // ───────────────────────────────────────────────────────────────────────
    // Interpolation
    // ───────────────────────────────────────────────────────────────────────

    pub fn parse_interpolation(&self, text: &str, flat: &FlatScope) -> Rc<Interpolation> {
        let key = format!("{}{}{}", text, KEY_SEP, flat.signature);
        if let Some(parsed) = self.interpolations.borrow().get(&key) {
            return parsed.clone();
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;
        while let Some(brace) = rest.find('{') {
            literal.push_str(&rest[..brace]);
            match self.probe(&rest[brace..], flat) {
                Some((body, consumed)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Expr(body));
                    rest = &rest[brace + consumed..];
                }
                None => {
                    literal.push('{');
                    rest = &rest[brace + 1..];
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let lone = segments.len() == 1 && matches!(segments[0], Segment::Expr(_));
        let parsed = Rc::new(Interpolation { segments, lone });
        self.interpolations.borrow_mut().insert(key, parsed.clone());
        parsed
    }

    /// Stringify an interpolated text. Segment errors are captured: the
    /// segment renders as a bracketed marker and the error goes to the warn
    /// channel, so the surrounding UI stays coherent.
    pub fn interpolate_text(&self, text: &str, flat: &FlatScope, substrate: &Substrate) -> String {
        let parsed = self.parse_interpolation(text, flat);
        let mut out = String::new();
        for segment in &parsed.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr(body) => {
                    match self.evaluate(body, flat, Mode::Pure, substrate) {
                        Ok(value) => out.push_str(&display_value(&value)),
                        Err(err) => {
                            tracing::warn!(code = %err.code, "interpolation error in '{{{}}}': {}", body, err.message);
                            out.push_str(&format!("[Error: {}]", err.message));
                        }
                    }
                }
            }
        }
        out
    }

    /// Value-preserving interpolation: a lone expression returns its raw
    /// typed value; mixed content stringifies. Errors propagate.
    pub fn interpolate_value(
        &self,
        text: &str,
        flat: &FlatScope,
        substrate: &Substrate,
    ) -> Result<Value, RuntimeError> {
        let parsed = self.parse_interpolation(text, flat);
        if parsed.lone {
            if let Segment::Expr(body) = &parsed.segments[0] {
                return self.evaluate(body, flat, Mode::Pure, substrate);
            }
        }
        let mut out = String::new();
        for segment in &parsed.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr(body) => {
                    let value = self.evaluate(body, flat, Mode::Pure, substrate)?;
                    out.push_str(&display_value(&value));
                }
            }
        }
        Ok(Value::String(out))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITE AND ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrite `@Name` to `__H_Name` wherever `Name` case-insensitively matches
/// a visible handle alias. String literals are skipped; unrecognized
/// `@`-names pass through for the parser to reject.
pub fn rewrite_handles(body: &str, flat: &FlatScope) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            in_string = Some(c);
            out.push(c);
            i += 1;
            continue;
        }
        if c == '@' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len()
                && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
            {
                end += 1;
            }
            if end > start {
                let name: String = chars[start..end].iter().collect();
                if flat.has_handle(&name) {
                    out.push_str(HANDLE_PREFIX);
                    out.push_str(&name);
                    i = end;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Parameter construction from the rewritten body. Author identifiers
/// canonicalize to an upper-case internal form: every `$`-value or
/// `__H_`-handle identifier the body references contributes its canonical
/// parameter name, and each authored spelling that differs becomes an alias
/// parameter mapped to the canonical one. Deriving the list from the text
/// (and the signature-driven rewrite) keeps entries sound under the
/// `text ‖ handle-signature` cache key — `$`-value bindings vary per call
/// and never reshape a cached entry.
pub fn build_params(rewritten: &str) -> (Vec<String>, HashMap<String, String>) {
    let mut params = std::collections::BTreeSet::new();
    let mut aliases = HashMap::new();
    for ident in scan_identifiers(rewritten) {
        if !(ident.starts_with('$') || ident.starts_with(HANDLE_PREFIX)) {
            continue;
        }
        let canonical = ident.to_uppercase();
        if ident != canonical {
            aliases.insert(ident.clone(), canonical.clone());
            params.insert(ident);
        }
        params.insert(canonical);
    }
    (params.into_iter().collect(), aliases)
}

/// Sigil-bearing identifiers referenced by a body, string literals skipped.
fn scan_identifiers(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(quote) = in_string {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            in_string = Some(c);
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            out.push(chars[start..i].iter().collect());
            continue;
        }
        i += 1;
    }
    out
}

/// Per-call environment built from the compiled entry: each parameter
/// resolves through the alias map to its canonical form, handle parameters
/// bind the scope's handle, `$`-parameters bind the scope value when one is
/// visible, and imports resolve ambiently. Alias parameters share the slot
/// of their canonical.
pub fn build_env<'a>(
    entry: &CompiledEntry,
    flat: &'a FlatScope,
    mode: Mode,
    substrate: &'a Substrate,
) -> EvalCtx<'a> {
    let mut bindings = HashMap::new();
    for param in &entry.params {
        let canonical = entry.aliases.get(param).unwrap_or(param);
        let slot = match canonical.strip_prefix(HANDLE_PREFIX) {
            Some(name) => flat.handle(name).map(|h| Slot::Handle(h.clone())),
            None => flat.value(canonical).map(|v| Slot::Val(v.clone())),
        };
        if let Some(slot) = slot {
            bindings.insert(param.clone(), slot);
        }
    }
    EvalCtx {
        bindings,
        imports: &flat.imports,
        substrate,
        mode,
    }
}
