//! Tree-walking evaluator for compiled expressions.
//!
//! Evaluation works over *slots*: either an owned value or a handle. Member
//! access on a handle extends its path without reading, which gives the
//! null-safe chaining semantics — the read happens only when the result is
//! materialized. Assignment resolves its target to a handle place and routes
//! through the substrate write path; pure mode rejects it.

use crate::error::RuntimeError;
use crate::expr::{BinOp, Expr};
use crate::handle::{Handle, Mode};
use crate::substrate::Substrate;
use crate::value::{display_value, is_truthy, values_equal};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub enum Slot {
    Val(Value),
    Handle(Handle),
}

pub struct EvalCtx<'a> {
    pub bindings: HashMap<String, Slot>,
    pub imports: &'a HashSet<String>,
    pub substrate: &'a Substrate,
    pub mode: Mode,
}

impl<'a> EvalCtx<'a> {
    /// Resolve a slot to an owned value; handles read live state.
    pub fn materialize(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Val(v) => v.clone(),
            Slot::Handle(h) => self.substrate.read(h),
        }
    }
}

pub fn eval(expr: &Expr, ctx: &EvalCtx) -> Result<Slot, RuntimeError> {
    match expr {
        Expr::Lit(v) => Ok(Slot::Val(v.clone())),

        // Lookup is exact: the environment binds every parameter under its
        // canonical name and each authored spelling.
        Expr::Ident(name) => {
            if let Some(slot) = ctx.bindings.get(name) {
                return Ok(slot.clone());
            }
            if ctx.imports.contains(name) {
                return Err(RuntimeError::eval(format!(
                    "Imported identifier '{}' is only callable.",
                    name
                )));
            }
            Err(RuntimeError::unknown_ident(name))
        }

        Expr::Member(obj, name) => {
            let slot = eval(obj, ctx)?;
            match slot {
                Slot::Handle(h) => Ok(Slot::Handle(h.join(name))),
                Slot::Val(Value::Object(map)) => {
                    Ok(Slot::Val(map.get(name).cloned().unwrap_or(Value::Null)))
                }
                Slot::Val(Value::Array(items)) if name == "length" => {
                    Ok(Slot::Val(Value::Number(items.len().into())))
                }
                Slot::Val(Value::String(s)) if name == "length" => {
                    Ok(Slot::Val(Value::Number(s.chars().count().into())))
                }
                Slot::Val(other) => Err(RuntimeError::eval(format!(
                    "Cannot read property '{}' of {}.",
                    name,
                    type_name(&other)
                ))),
            }
        }

        Expr::Index(obj, index) => {
            let slot = eval(obj, ctx)?;
            let key = ctx.materialize(&eval(index, ctx)?);
            match slot {
                Slot::Handle(h) => Ok(Slot::Handle(h.join(&display_value(&key)))),
                Slot::Val(Value::Object(map)) => {
                    let key = display_value(&key);
                    Ok(Slot::Val(map.get(&key).cloned().unwrap_or(Value::Null)))
                }
                Slot::Val(Value::Array(items)) => {
                    let idx = key
                        .as_u64()
                        .ok_or_else(|| RuntimeError::eval("Array index must be a number."))?;
                    Ok(Slot::Val(
                        items.get(idx as usize).cloned().unwrap_or(Value::Null),
                    ))
                }
                Slot::Val(other) => Err(RuntimeError::eval(format!(
                    "Cannot index into {}.",
                    type_name(&other)
                ))),
            }
        }

        Expr::Not(inner) => {
            let value = ctx.materialize(&eval(inner, ctx)?);
            Ok(Slot::Val(Value::Bool(!is_truthy(&value))))
        }

        Expr::Neg(inner) => {
            let value = ctx.materialize(&eval(inner, ctx)?);
            let n = to_number(&value)?;
            Ok(Slot::Val(num_value(-n)))
        }

        Expr::Bin(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),

        Expr::Ternary(cond, consequent, alternate) => {
            let test = ctx.materialize(&eval(cond, ctx)?);
            if is_truthy(&test) {
                eval(consequent, ctx)
            } else {
                eval(alternate, ctx)
            }
        }

        Expr::Assign(target, value) => {
            if ctx.mode == Mode::Pure {
                return Err(RuntimeError::pure_mutation(
                    "Assignment attempted in a pure expression.",
                ));
            }
            let rhs = ctx.materialize(&eval(value, ctx)?);
            let place = eval_place(target, ctx)?;
            ctx.substrate.write(&place, rhs.clone());
            Ok(Slot::Val(rhs))
        }

        Expr::Object(entries) => {
            let mut map = Map::new();
            for (key, value_expr) in entries {
                let value = ctx.materialize(&eval(value_expr, ctx)?);
                map.insert(key.clone(), value);
            }
            Ok(Slot::Val(Value::Object(map)))
        }

        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(ctx.materialize(&eval(item, ctx)?));
            }
            Ok(Slot::Val(Value::Array(out)))
        }

        Expr::Call(callee, args) => {
            let name = match callee.as_ref() {
                Expr::Ident(name) => name,
                _ => return Err(RuntimeError::eval("Only imported identifiers are callable.")),
            };
            if !ctx.imports.contains(name) {
                return Err(RuntimeError::unknown_ident(name));
            }
            let external = ctx
                .substrate
                .external(name)
                .ok_or_else(|| RuntimeError::unknown_ident(name))?;
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                arg_values.push(ctx.materialize(&eval(arg, ctx)?));
            }
            Ok(Slot::Val(external(&arg_values)?))
        }
    }
}

/// Resolve an assignment target to a handle place. Targets must be rooted at
/// a handle binding; values are not assignable.
fn eval_place(expr: &Expr, ctx: &EvalCtx) -> Result<Handle, RuntimeError> {
    match expr {
        Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) => match eval(expr, ctx)? {
            Slot::Handle(h) => {
                if h.path.is_empty() {
                    return Err(RuntimeError::eval(
                        "Cannot assign to a namespace root; assign to a path inside it.",
                    ));
                }
                Ok(h)
            }
            Slot::Val(_) => Err(RuntimeError::eval(
                "Assignment target is a value, not a state place.",
            )),
        },
        _ => Err(RuntimeError::eval("Assignment target is not a place.")),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalCtx) -> Result<Slot, RuntimeError> {
    // Short-circuit forms keep the operand slot alive, so a handle can flow
    // through `||` defaults.
    match op {
        BinOp::Or => {
            let left = eval(lhs, ctx)?;
            if is_truthy(&ctx.materialize(&left)) {
                return Ok(left);
            }
            return eval(rhs, ctx);
        }
        BinOp::And => {
            let left = eval(lhs, ctx)?;
            if !is_truthy(&ctx.materialize(&left)) {
                return Ok(left);
            }
            return eval(rhs, ctx);
        }
        _ => {}
    }

    let left = ctx.materialize(&eval(lhs, ctx)?);
    let right = ctx.materialize(&eval(rhs, ctx)?);

    let value = match op {
        BinOp::Eq => Value::Bool(values_equal(&left, &right)),
        BinOp::Ne => Value::Bool(!values_equal(&left, &right)),
        BinOp::Add => match (&left, &right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", display_value(&left), display_value(&right)))
            }
            _ => num_value(to_number(&left)? + to_number(&right)?),
        },
        BinOp::Sub => num_value(to_number(&left)? - to_number(&right)?),
        BinOp::Mul => num_value(to_number(&left)? * to_number(&right)?),
        BinOp::Div => {
            let divisor = to_number(&right)?;
            if divisor == 0.0 {
                return Err(RuntimeError::eval("Division by zero."));
            }
            num_value(to_number(&left)? / divisor)
        }
        BinOp::Rem => {
            let divisor = to_number(&right)?;
            if divisor == 0.0 {
                return Err(RuntimeError::eval("Division by zero."));
            }
            num_value(to_number(&left)? % divisor)
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&left, &right)?;
            let result = match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Value::Bool(result)
        }
        BinOp::Or | BinOp::And => unreachable!(),
    };
    Ok(Slot::Val(value))
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, RuntimeError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let l = to_number(left)?;
            let r = to_number(right)?;
            l.partial_cmp(&r)
                .ok_or_else(|| RuntimeError::eval("Incomparable numbers."))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => Err(RuntimeError::eval(format!(
            "Cannot compare {} with {}.",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn to_number(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| RuntimeError::eval("Number out of range.")),
        other => Err(RuntimeError::eval(format!(
            "Expected a number, found {}.",
            type_name(other)
        ))),
    }
}

/// Normalize arithmetic results: integral values stay integers.
fn num_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        Value::Number((f as i64).into())
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
