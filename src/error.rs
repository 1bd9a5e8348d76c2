use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_PURE_MUTATION: &str = "W-ERR-PURE-001";
pub const ERR_NAME_COLLISION: &str = "W-ERR-NAME-001";
pub const ERR_SYNTAX_SHAPE: &str = "W-ERR-SHAPE-001";
pub const ERR_INIT_SHAPE: &str = "W-ERR-INIT-001";
pub const ERR_DUPLICATE_MARKER: &str = "W-ERR-MARK-001";
pub const ERR_TEMPLATE_NOT_FOUND: &str = "W-ERR-TMPL-001";
pub const ERR_STRUCTURAL: &str = "W-ERR-STRUCT-001";
pub const ERR_EXPR_SYNTAX: &str = "W-ERR-EXPR-001";
pub const ERR_UNKNOWN_IDENT: &str = "W-ERR-EXPR-002";
pub const ERR_EVAL: &str = "W-ERR-EXPR-003";

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_PURE_MUTATION => "Pure expressions never mutate state.",
        ERR_NAME_COLLISION => {
            "Value and handle names are case-insensitive; one spelling per frame."
        }
        ERR_SYNTAX_SHAPE => "Reserved attributes follow their declared grammar.",
        ERR_INIT_SHAPE => "init produces an object and appears at exactly one site.",
        ERR_DUPLICATE_MARKER => "Every row of one iteration expansion has a distinct marker.",
        ERR_TEMPLATE_NOT_FOUND => "Component use-sites refer to a registered template.",
        ERR_STRUCTURAL => "One setup tag per page, before any declarative root.",
        ERR_EXPR_SYNTAX => "Expression bodies parse as a single expression.",
        ERR_UNKNOWN_IDENT => "Every identifier resolves to a scope binding or an import.",
        ERR_EVAL => "Expressions evaluate over defined values.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// The single error currency of the runtime. Carries a stable code so hosts
/// and tests can dispatch without string-matching messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeError {
    pub code: String,
    pub message: String,
    pub guarantee: String,
}

impl RuntimeError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        RuntimeError {
            code: code.to_string(),
            message: message.into(),
            guarantee: get_guarantee(code).to_string(),
        }
    }

    pub fn pure_mutation(message: impl Into<String>) -> Self {
        Self::new(ERR_PURE_MUTATION, message)
    }

    pub fn name_collision(message: impl Into<String>) -> Self {
        Self::new(ERR_NAME_COLLISION, message)
    }

    pub fn syntax_shape(message: impl Into<String>) -> Self {
        Self::new(ERR_SYNTAX_SHAPE, message)
    }

    pub fn init_shape(message: impl Into<String>) -> Self {
        Self::new(ERR_INIT_SHAPE, message)
    }

    pub fn duplicate_marker(message: impl Into<String>) -> Self {
        Self::new(ERR_DUPLICATE_MARKER, message)
    }

    pub fn template_not_found(message: impl Into<String>) -> Self {
        Self::new(ERR_TEMPLATE_NOT_FOUND, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(ERR_STRUCTURAL, message)
    }

    pub fn expr_syntax(message: impl Into<String>) -> Self {
        Self::new(ERR_EXPR_SYNTAX, message)
    }

    pub fn unknown_ident(name: &str) -> Self {
        Self::new(ERR_UNKNOWN_IDENT, format!("Unknown identifier '{}'.", name))
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ERR_EVAL, message)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}
