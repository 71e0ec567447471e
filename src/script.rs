//! Embedded script language for the interpreted pipeline.
//!
//! Artifacts are small modules of `def` functions in a Python-like
//! surface syntax. They are parsed in-process ([`parse`]) and invoked
//! directly ([`eval`]), which is what lets the harness reflect a script's
//! callable surface without spawning anything.

pub mod eval;
pub mod parse;

pub use eval::{CALL_DEPTH_LIMIT, DEFAULT_FUEL, EvalError};
pub use parse::{ParseError, parse_module};

/// A runtime value. Displayed forms are what the protocol compares
/// against expected-value labels.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    None,
}

impl Value {
    /// Converts a JSON argument into a runtime value. Objects have no
    /// script-level counterpart and are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        use serde_json::Value as Json;
        match value {
            Json::Null => Ok(Value::None),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(format!("unrepresentable number {n}"))
                }
            }
            Json::String(s) => Ok(Value::Str(s.clone())),
            Json::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Json::Object(_) => Err("object arguments are not supported".to_string()),
        }
    }

    /// Element form used inside displayed lists; strings are quoted there
    /// so `["a,b"]` and `["a", "b"]` stay distinguishable.
    fn fmt_element(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "'{s}'"),
            other => write!(f, "{other}"),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::None => f.write_str("none"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_element(f)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A parsed artifact: its function definitions in source order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    pub(crate) fn push(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign(String, Expr),
    Return(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
