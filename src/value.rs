use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single column value. `Null` doubles as the empty aggregate slot:
/// reducing anything into `Null` returns the other operand.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
pub enum Val {
    Int(i64),
    Uint(u64),
    Float(OrderedFloat<f64>),
    Str(String),
    Null,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum BasicType {
    Integer,
    Unsigned,
    Float,
    String,
    Null,
}

impl Val {
    pub fn get_type(&self) -> BasicType {
        match *self {
            Val::Int(_) => BasicType::Integer,
            Val::Uint(_) => BasicType::Unsigned,
            Val::Float(_) => BasicType::Float,
            Val::Str(_) => BasicType::String,
            Val::Null => BasicType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(*self, Val::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(*self, Val::Int(_) | Val::Uint(_) | Val::Float(_))
    }

    /// Numeric view as f64. Callers check `is_numeric` first.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Val::Int(i) => i as f64,
            Val::Uint(u) => u as f64,
            Val::Float(f) => f.into_inner(),
            Val::Str(_) | Val::Null => f64::NAN,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Val::Null => write!(f, "null"),
            Val::Int(i) => write!(f, "{}", i),
            Val::Uint(u) => write!(f, "{}", u),
            Val::Float(x) => write!(f, "{:e}", x),
            Val::Str(ref s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for Val {
    fn from(val: i64) -> Val {
        Val::Int(val)
    }
}

impl From<u64> for Val {
    fn from(val: u64) -> Val {
        Val::Uint(val)
    }
}

impl From<f64> for Val {
    fn from(val: f64) -> Val {
        Val::Float(OrderedFloat(val))
    }
}

impl<'a> From<&'a str> for Val {
    fn from(val: &str) -> Val {
        Val::Str(val.to_string())
    }
}

impl From<String> for Val {
    fn from(val: String) -> Val {
        Val::Str(val)
    }
}

impl From<()> for Val {
    fn from(_: ()) -> Val {
        Val::Null
    }
}
