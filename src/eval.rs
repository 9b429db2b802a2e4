//! Evaluator/binder: executes a compiled unit against a scope, with locals
//! bound as named parameters and an optional content block for `yield`.
//!
//! The output buffer starts empty and the unit's return value is its final
//! contents. When the outvar names a pre-existing scope attribute, its value
//! is saved before execution and restored on every exit path — success or
//! failure — so a scope reused across renders never leaks buffer state.
//! Failures are translated through the unit's line map before they reach
//! the caller.

use std::collections::HashMap;

use crate::cache::CompiledUnit;
use crate::error::{Error, EvalErrorKind, EvaluationError};
use crate::program::expr::{BinOp, Expr, UnaryOp};
use crate::program::{Arm, Node};
use crate::scope::Scope;
use crate::template::Locals;
use crate::value::Value;

/// An in-flight failure, located by generated line (0 = before the body ran).
struct Raise {
    kind: EvalErrorKind,
    message: String,
    line: u32,
}

impl Raise {
    fn new(kind: EvalErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}

/// Execute `unit` against `scope`. See [`crate::Template::render`] for the
/// caller-facing contract.
pub(crate) fn render(
    unit: &CompiledUnit,
    scope: &mut dyn Scope,
    locals: &Locals,
    block: Option<&dyn Fn() -> String>,
) -> Result<String, Error> {
    let outvar_attr = unit.outvar.strip_prefix('@');
    let saved = outvar_attr.and_then(|name| scope.attr(name));

    let result = run(unit, &mut *scope, locals, block, outvar_attr);

    // Restoration runs before the result — success or failure — is returned.
    if let (Some(name), Some(value)) = (outvar_attr, saved) {
        scope.set_attr(name, value);
    }

    result.map_err(|raise| translate(unit, raise).into())
}

fn run(
    unit: &CompiledUnit,
    scope: &mut dyn Scope,
    locals: &Locals,
    block: Option<&dyn Fn() -> String>,
    outvar_attr: Option<&str>,
) -> Result<String, Raise> {
    let mut bound = HashMap::with_capacity(unit.signature.len());
    for name in &unit.signature {
        let value = locals.get(name).ok_or_else(|| {
            Raise::new(
                EvalErrorKind::MissingLocal,
                format!("no value supplied for local '{name}'"),
                0,
            )
        })?;
        bound.insert(name.as_str(), value.clone());
    }

    let exposed_attr = if unit.expose_buffer { outvar_attr } else { None };
    let mut vm = Run {
        scope,
        bound,
        block,
        buf: String::new(),
        exposed_attr,
    };
    vm.exec(&unit.program.nodes)?;
    let Run { buf, scope, .. } = vm;

    // Exposure side channel: leave the final buffer readable through the
    // aliased attribute (a pre-existing value is restored by the caller).
    if let Some(name) = exposed_attr {
        scope.set_attr(name, Value::Str(buf.clone()));
    }
    Ok(buf)
}

/// Translate a failure's generated line to the original source location.
fn translate(unit: &CompiledUnit, raise: Raise) -> EvaluationError {
    let line = unit
        .line_map
        .original_line(raise.line)
        .map(|original| unit.start_line + original - 1)
        .unwrap_or(unit.start_line);
    EvaluationError {
        kind: raise.kind,
        message: raise.message,
        path: unit.path.clone(),
        line,
    }
}

struct Run<'a> {
    scope: &'a mut dyn Scope,
    bound: HashMap<&'a str, Value>,
    block: Option<&'a dyn Fn() -> String>,
    buf: String,
    /// `Some` when the buffer is live-aliased to a scope attribute.
    exposed_attr: Option<&'a str>,
}

impl Run<'_> {
    fn exec(&mut self, nodes: &[Node]) -> Result<(), Raise> {
        for node in nodes {
            match node {
                Node::Text(text) => self.buf.push_str(text),
                Node::Emit { expr, line } => {
                    let value = self.eval(expr, *line)?;
                    self.buf.push_str(&value.to_string());
                }
                Node::If { arms } => self.exec_if(arms)?,
                Node::Fail { message, line } => {
                    let message = match message {
                        Some(expr) => self.eval(expr, *line)?.to_string(),
                        None => "unhandled exception".to_string(),
                    };
                    return Err(Raise::new(EvalErrorKind::Raised, message, *line));
                }
                Node::AssignAttr { name, expr, line } => {
                    let value = self.eval(expr, *line)?;
                    if self.exposed_attr == Some(name.as_str()) {
                        // Writing through the aliased attribute replaces the
                        // in-progress buffer.
                        self.buf = value.to_string();
                    } else {
                        self.scope.set_attr(name, value);
                    }
                }
                Node::Discard { expr, line } => {
                    self.eval(expr, *line)?;
                }
            }
        }
        Ok(())
    }

    fn exec_if(&mut self, arms: &[Arm]) -> Result<(), Raise> {
        for arm in arms {
            let chosen = match &arm.cond {
                Some(cond) => self.eval(cond, arm.line)?.is_truthy(),
                None => true,
            };
            if chosen {
                return self.exec(&arm.nodes);
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, line: u32) -> Result<Value, Raise> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => {
                if let Some(value) = self.bound.get(name.as_str()) {
                    return Ok(value.clone());
                }
                self.scope.call(name).ok_or_else(|| {
                    Raise::new(
                        EvalErrorKind::UndefinedLocal,
                        format!("undefined local variable or method '{name}'"),
                        line,
                    )
                })
            }
            Expr::Attr(name) => {
                if self.exposed_attr == Some(name.as_str()) {
                    return Ok(Value::Str(self.buf.clone()));
                }
                self.scope.attr(name).ok_or_else(|| {
                    Raise::new(
                        EvalErrorKind::UndefinedAttribute,
                        format!("undefined attribute '@{name}'"),
                        line,
                    )
                })
            }
            Expr::Yield => match self.block {
                Some(block) => Ok(Value::Str(block())),
                None => Err(Raise::new(
                    EvalErrorKind::NoBlock,
                    "no block given (yield)",
                    line,
                )),
            },
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, line)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Int(n) => int_result(n.checked_neg(), line),
                        other => Err(Raise::new(
                            EvalErrorKind::TypeError,
                            format!("cannot negate {}", other.type_name()),
                            line,
                        )),
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, line),
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, line: u32) -> Result<Value, Raise> {
        // Short-circuiting operators return an operand, not a bool.
        if matches!(op, BinOp::And | BinOp::Or) {
            let left = self.eval(lhs, line)?;
            return match (op, left.is_truthy()) {
                (BinOp::And, false) | (BinOp::Or, true) => Ok(left),
                _ => self.eval(rhs, line),
            };
        }

        let left = self.eval(lhs, line)?;
        let right = self.eval(rhs, line)?;
        match (op, &left, &right) {
            (BinOp::Eq, ..) => Ok(Value::Bool(left == right)),
            (BinOp::Ne, ..) => Ok(Value::Bool(left != right)),
            (BinOp::Add, Value::Int(a), Value::Int(b)) => int_result(a.checked_add(*b), line),
            (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (BinOp::Sub, Value::Int(a), Value::Int(b)) => int_result(a.checked_sub(*b), line),
            (BinOp::Mul, Value::Int(a), Value::Int(b)) => int_result(a.checked_mul(*b), line),
            (BinOp::Div, Value::Int(_), Value::Int(0)) | (BinOp::Rem, Value::Int(_), Value::Int(0)) => {
                Err(Raise::new(EvalErrorKind::Raised, "divided by 0", line))
            }
            (BinOp::Div, Value::Int(a), Value::Int(b)) => int_result(a.checked_div(*b), line),
            (BinOp::Rem, Value::Int(a), Value::Int(b)) => int_result(a.checked_rem(*b), line),
            (BinOp::Lt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a < b)),
            (BinOp::Le, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a <= b)),
            (BinOp::Gt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a > b)),
            (BinOp::Ge, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a >= b)),
            (BinOp::Lt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a < b)),
            (BinOp::Le, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a <= b)),
            (BinOp::Gt, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a > b)),
            (BinOp::Ge, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a >= b)),
            _ => Err(type_error(&op.to_string(), &left, &right, line)),
        }
    }
}

/// Checked-arithmetic outcome: `None` (overflow) raises rather than panics,
/// so the scope restoration in [`render`] still runs.
fn int_result(result: Option<i64>, line: u32) -> Result<Value, Raise> {
    result
        .map(Value::Int)
        .ok_or_else(|| Raise::new(EvalErrorKind::Raised, "integer overflow", line))
}

fn type_error(op: &str, left: &Value, right: &Value, line: u32) -> Raise {
    Raise::new(
        EvalErrorKind::TypeError,
        format!(
            "unsupported operand types for {op}: {} and {}",
            left.type_name(),
            right.type_name()
        ),
        line,
    )
}
