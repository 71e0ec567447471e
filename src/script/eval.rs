//! Fuel-limited tree-walking evaluator.
//!
//! Every evaluation step burns one unit of fuel and calls are depth
//! capped, so runaway user code fails its test case instead of hanging
//! the owning connection.

use std::collections::HashMap;

use super::{BinOp, Expr, Module, Stmt, UnOp, Value};

/// Evaluation budget for one invocation.
pub const DEFAULT_FUEL: u64 = 1_000_000;
/// Maximum nesting of script-level calls.
pub const CALL_DEPTH_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EvalError(pub String);

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl Module {
    /// Invokes a module function with the given arguments.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let mut interp = Interp {
            module: self,
            fuel: DEFAULT_FUEL,
        };
        interp.call_function(name, args.to_vec(), 0)
    }
}

struct Interp<'m> {
    module: &'m Module,
    fuel: u64,
}

impl Interp<'_> {
    fn burn(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::new("fuel exhausted"));
        }
        self.fuel -= 1;
        Ok(())
    }

    fn call_function(
        &mut self,
        name: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EvalError> {
        if depth > CALL_DEPTH_LIMIT {
            return Err(EvalError::new("call depth limit exceeded"));
        }

        // Module functions shadow builtins
        let Some(function) = self.module.get(name) else {
            return builtin_call(name, &args);
        };

        if function.params.len() != args.len() {
            return Err(EvalError::new(format!(
                "{name}() takes {} argument(s), got {}",
                function.params.len(),
                args.len()
            )));
        }

        let mut locals: HashMap<String, Value> =
            function.params.iter().cloned().zip(args).collect();

        for stmt in &function.body {
            if let Some(value) = self.exec_stmt(stmt, &mut locals, depth)? {
                return Ok(value);
            }
        }
        Ok(Value::None)
    }

    /// Returns `Some(value)` when the statement returned from the function.
    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        locals: &mut HashMap<String, Value>,
        depth: usize,
    ) -> Result<Option<Value>, EvalError> {
        self.burn()?;
        match stmt {
            Stmt::Assign(name, expr) => {
                let value = self.eval_expr(expr, locals, depth)?;
                locals.insert(name.clone(), value);
                Ok(None)
            }
            Stmt::Return(expr) => Ok(Some(self.eval_expr(expr, locals, depth)?)),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_condition(cond, locals, depth)? {
                    self.exec_stmt(then, locals, depth)
                } else if let Some(branch) = otherwise {
                    self.exec_stmt(branch, locals, depth)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn eval_condition(
        &mut self,
        expr: &Expr,
        locals: &mut HashMap<String, Value>,
        depth: usize,
    ) -> Result<bool, EvalError> {
        match self.eval_expr(expr, locals, depth)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(format!("expected a boolean, got {other}"))),
        }
    }

    fn eval_expr(
        &mut self,
        expr: &Expr,
        locals: &mut HashMap<String, Value>,
        depth: usize,
    ) -> Result<Value, EvalError> {
        self.burn()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => locals
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("undefined name {name:?}"))),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval_expr(item, locals, depth))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Unary(UnOp::Neg, operand) => match self.eval_expr(operand, locals, depth)? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(EvalError::new(format!("cannot negate {other}"))),
            },
            Expr::Unary(UnOp::Not, operand) => match self.eval_expr(operand, locals, depth)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(EvalError::new(format!("expected a boolean, got {other}"))),
            },
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if self.eval_condition(lhs, locals, depth)? {
                    self.eval_condition(rhs, locals, depth).map(Value::Bool)
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval_condition(lhs, locals, depth)? {
                    Ok(Value::Bool(true))
                } else {
                    self.eval_condition(rhs, locals, depth).map(Value::Bool)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs, locals, depth)?;
                let rhs = self.eval_expr(rhs, locals, depth)?;
                apply_binary(*op, lhs, rhs)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, locals, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call_function(name, args, depth + 1)
            }
        }
    }
}

fn apply_binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use Value::{Float, Int, List, Str};

    match op {
        BinOp::Add => match (lhs, rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_add(b))),
            (Str(a), Str(b)) => Ok(Str(a + &b)),
            (List(mut a), List(b)) => {
                a.extend(b);
                Ok(List(a))
            }
            (a, b) => numeric_op(a, b, "+", |x, y| x + y),
        },
        BinOp::Sub => match (lhs, rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(b))),
            (a, b) => numeric_op(a, b, "-", |x, y| x - y),
        },
        BinOp::Mul => match (lhs, rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(b))),
            (a, b) => numeric_op(a, b, "*", |x, y| x * y),
        },
        BinOp::Div => match (lhs, rhs) {
            (Int(_), Int(0)) => Err(EvalError::new("division by zero")),
            (Int(a), Int(b)) => Ok(Int(a.wrapping_div(b))),
            (a, b) => numeric_op(a, b, "/", |x, y| x / y),
        },
        BinOp::Rem => match (lhs, rhs) {
            (Int(_), Int(0)) => Err(EvalError::new("division by zero")),
            (Int(a), Int(b)) => Ok(Int(a.wrapping_rem(b))),
            (a, b) => Err(type_error("%", &a, &b)),
        },
        BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinOp::Lt => compare(lhs, rhs, "<", |o| o == std::cmp::Ordering::Less),
        BinOp::Le => compare(lhs, rhs, "<=", |o| o != std::cmp::Ordering::Greater),
        BinOp::Gt => compare(lhs, rhs, ">", |o| o == std::cmp::Ordering::Greater),
        BinOp::Ge => compare(lhs, rhs, ">=", |o| o != std::cmp::Ordering::Less),
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled in eval_expr"),
    }
}

fn numeric_op(
    lhs: Value,
    rhs: Value,
    op: &str,
    apply: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (as_f64(&lhs), as_f64(&rhs)) {
        (Some(a), Some(b)) => Ok(Value::Float(apply(a, b))),
        _ => Err(type_error(op, &lhs, &rhs)),
    }
}

fn compare(
    lhs: Value,
    rhs: Value,
    op: &str,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let ordering = match (&lhs, &rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (as_f64(&lhs), as_f64(&rhs)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    match ordering {
        Some(ordering) => Ok(Value::Bool(accept(ordering))),
        None => Err(type_error(op, &lhs, &rhs)),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn type_error(op: &str, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::new(format!("unsupported operands for `{op}`: {lhs} and {rhs}"))
}

fn builtin_call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match (name, args) {
        ("abs", [Value::Int(i)]) => Ok(Value::Int(i.wrapping_abs())),
        ("abs", [Value::Float(x)]) => Ok(Value::Float(x.abs())),
        ("len", [Value::Str(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        ("len", [Value::List(items)]) => Ok(Value::Int(items.len() as i64)),
        ("min", [a, b]) => pick(a, b, |a, b| a <= b),
        ("max", [a, b]) => pick(a, b, |a, b| a >= b),
        ("abs" | "len" | "min" | "max", _) => {
            Err(EvalError::new(format!("bad arguments for {name}()")))
        }
        _ => Err(EvalError::new(format!("unknown function {name:?}"))),
    }
}

fn pick(a: &Value, b: &Value, keep_first: impl Fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => Ok(if keep_first(x, y) { a.clone() } else { b.clone() }),
        _ => Err(EvalError::new("min()/max() take numeric arguments")),
    }
}
