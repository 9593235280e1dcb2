//! Tagged value union with numeric promotion
//!
//! Every runtime value is one variant of [`Value`]. Variables are values
//! too: a pattern field or an unevaluated RHS argument stays symbolic until
//! binding resolves it. Arithmetic, equality, and rendering all dispatch on
//! the tag. The promotion table is small: `Int op Int` stays `Int`,
//! anything else widens to `Float`, and division always yields `Float`.

use crate::{EngineError, EngineResult};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Scope a variable reference resolves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarScope {
    /// Defglobal-bound variable (`?*name*`); an unbound lookup is an error.
    Global,
    /// Single-field variable bound by pattern matching or `bind`.
    Local,
    /// Variable bound to a matched WME id by an assigned-pattern CE.
    Assigned,
}

/// A variable reference, optionally carrying its bound content.
///
/// The binding slot is written at most once, when the evaluator or the
/// working memory resolves the variable; it is read-only afterwards.
#[derive(Clone, Debug)]
pub struct Variable {
    /// Scope the variable resolves through.
    pub scope: VarScope,
    /// Name without the leading `?`; global names keep their asterisks
    /// (`*count*`), which keeps the scopes from colliding on a key.
    pub name: String,
    /// Bound content, if resolution has happened.
    pub binding: Option<Box<Value>>,
}

/// A runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Bare symbol (`red`, `match`, fact heads)
    Symbol(String),
    /// Double-quoted string; stored without the quotes
    Str(String),
    /// Boolean, rendered `TRUE` / `FALSE`
    Bool(bool),
    /// Variable reference
    Var(Variable),
}

impl Value {
    /// Build a symbol value.
    pub fn symbol(s: impl Into<String>) -> Self {
        Value::Symbol(s.into())
    }

    /// Build a string value (content without surrounding quotes).
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Build an unbound local (single-field) variable.
    pub fn local(name: impl Into<String>) -> Self {
        Value::Var(Variable {
            scope: VarScope::Local,
            name: name.into(),
            binding: None,
        })
    }

    /// Build an unbound global variable. The name keeps its asterisks.
    pub fn global(name: impl Into<String>) -> Self {
        Value::Var(Variable {
            scope: VarScope::Global,
            name: name.into(),
            binding: None,
        })
    }

    /// True for `Int` and `Float`.
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// True for variable references.
    pub fn is_variable(&self) -> bool {
        matches!(self, Value::Var(_))
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Follow a variable to its bound content.
    ///
    /// Returns `Some(self)` for non-variables, the binding for bound
    /// variables, and `None` for unbound ones.
    pub fn resolved(&self) -> Option<&Value> {
        match self {
            Value::Var(v) => v.binding.as_deref(),
            other => Some(other),
        }
    }

    fn expect_numbers(&self, other: &Value, op: &str) -> EngineResult<(f64, f64)> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(EngineError::Evaluate(format!(
                "\"{op}\" requires all arguments to be numbers"
            ))),
        }
    }

    /// Addition under the promotion table.
    pub fn add(&self, other: &Value) -> EngineResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            _ => {
                let (a, b) = self.expect_numbers(other, "+")?;
                Ok(Value::Float(a + b))
            }
        }
    }

    /// Subtraction under the promotion table.
    pub fn sub(&self, other: &Value) -> EngineResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            _ => {
                let (a, b) = self.expect_numbers(other, "-")?;
                Ok(Value::Float(a - b))
            }
        }
    }

    /// Multiplication under the promotion table.
    pub fn mul(&self, other: &Value) -> EngineResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            _ => {
                let (a, b) = self.expect_numbers(other, "*")?;
                Ok(Value::Float(a * b))
            }
        }
    }

    /// Division; the result is always `Float`.
    pub fn div(&self, other: &Value) -> EngineResult<Value> {
        let (a, b) = self.expect_numbers(other, "/")?;
        if b == 0.0 {
            return Err(EngineError::Evaluate("division by zero".into()));
        }
        Ok(Value::Float(a / b))
    }

    /// Remainder under the promotion table.
    pub fn rem(&self, other: &Value) -> EngineResult<Value> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => {
                Err(EngineError::Evaluate("modulo by zero".into()))
            }
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            _ => {
                let (a, b) = self.expect_numbers(other, "%")?;
                if b == 0.0 {
                    return Err(EngineError::Evaluate("modulo by zero".into()));
                }
                Ok(Value::Float(a % b))
            }
        }
    }

    /// Exponentiation under the promotion table.
    pub fn pow(&self, other: &Value) -> EngineResult<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => u32::try_from(*b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Value::Int)
                .ok_or_else(|| EngineError::Evaluate("integer overflow in \"**\"".into())),
            _ => {
                let (a, b) = self.expect_numbers(other, "**")?;
                Ok(Value::Float(a.powf(b)))
            }
        }
    }

    /// Numeric negation, preserving the tag.
    pub fn neg(&self) -> EngineResult<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(EngineError::Evaluate(
                "\"-\" requires all arguments to be numbers".into(),
            )),
        }
    }

    /// Absolute value, preserving the tag.
    pub fn abs(&self) -> EngineResult<Value> {
        match self {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            _ => Err(EngineError::Evaluate(
                "\"abs\" requires all arguments to be numbers".into(),
            )),
        }
    }

    /// Ordering between comparable values.
    ///
    /// Numbers compare by value across `Int`/`Float`; symbols and strings
    /// compare lexicographically within their own kind. Everything else is
    /// incomparable and yields `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Symbol(a), Value::Symbol(b)) | (Value::Str(a), Value::Str(b)) => {
                Some(a.cmp(b))
            }
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Var(a), Value::Var(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Int(n) and Float(n.0) are equal, so an integral float must hash
        // like the equal integer.
        match self {
            Value::Int(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(f) {
                    0u8.hash(state);
                    (*f as i64).hash(state);
                } else {
                    1u8.hash(state);
                    f.to_bits().hash(state);
                }
            }
            Value::Symbol(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Value::Str(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Bool(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Value::Var(v) => {
                5u8.hash(state);
                v.name.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Var(v) => write!(f, "?{}", v.name),
        }
    }
}
