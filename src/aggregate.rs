use std::cmp::Ordering;

use log::error;
use serde::{Deserialize, Serialize};

use crate::errors::TreeError;
use crate::value::Val;

/// Number of aggregate slots per measure column. Slot order within a
/// measure is fixed: `[Min, Max, Sum, Count]`.
pub const TOTAL_AGG_FNS: usize = 4;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum AggFn {
    Min,
    Max,
    Sum,
    Count,
}

impl AggFn {
    pub const ALL: [AggFn; TOTAL_AGG_FNS] = [AggFn::Min, AggFn::Max, AggFn::Sum, AggFn::Count];

    /// Index of this function within a measure column's slot group.
    pub fn slot(self) -> usize {
        match self {
            AggFn::Min => 0,
            AggFn::Max => 1,
            AggFn::Sum => 2,
            AggFn::Count => 3,
        }
    }
}

/// The conventional right operand when counting a single record.
pub const ONE: Val = Val::Uint(1);

/// Folds `right` into `left` under `f`. All four reductions are commutative
/// and associative, so roll-up order never matters. A `Null` operand is the
/// empty slot and yields the other operand unchanged.
pub fn reduce(left: &Val, right: &Val, f: AggFn) -> Result<Val, TreeError> {
    if left.is_null() {
        return Ok(right.clone());
    }
    if right.is_null() {
        return Ok(left.clone());
    }
    match f {
        AggFn::Min => min_max(left, right, Ordering::Less),
        AggFn::Max => min_max(left, right, Ordering::Greater),
        AggFn::Sum => sum(left, right),
        AggFn::Count => count(left, right),
    }
}

fn min_max(left: &Val, right: &Val, keep: Ordering) -> Result<Val, TreeError> {
    let ord = match (left, right) {
        (Val::Str(a), Val::Str(b)) => a.cmp(b),
        (a, b) if a.is_numeric() && b.is_numeric() => numeric_cmp(a, b),
        _ => return mismatch(left, right, "min/max"),
    };
    if ord == keep {
        Ok(left.clone())
    } else {
        Ok(right.clone())
    }
}

// Sign-correct comparison without leaving the integer domain unless one
// side is a float.
fn numeric_cmp(left: &Val, right: &Val) -> Ordering {
    match (left, right) {
        (Val::Int(a), Val::Int(b)) => a.cmp(b),
        (Val::Uint(a), Val::Uint(b)) => a.cmp(b),
        (Val::Int(a), Val::Uint(b)) => {
            if *a < 0 {
                Ordering::Less
            } else {
                (*a as u64).cmp(b)
            }
        }
        (Val::Uint(a), Val::Int(b)) => {
            if *b < 0 {
                Ordering::Greater
            } else {
                a.cmp(&(*b as u64))
            }
        }
        _ => left.as_f64().total_cmp(&right.as_f64()),
    }
}

fn sum(left: &Val, right: &Val) -> Result<Val, TreeError> {
    match (left, right) {
        (Val::Int(a), Val::Int(b)) => Ok(Val::Int(a + b)),
        (Val::Uint(a), Val::Uint(b)) => Ok(Val::Uint(a + b)),
        // Mixed width/sign or any float promotes to float.
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(Val::from(a.as_f64() + b.as_f64())),
        _ => mismatch(left, right, "sum"),
    }
}

fn count(left: &Val, right: &Val) -> Result<Val, TreeError> {
    Ok(Val::Uint(as_count(left)? + as_count(right)?))
}

// Counts are unsigned; the insert pass contributes `ONE` per record and
// roll-up contributes child counts.
fn as_count(val: &Val) -> Result<u64, TreeError> {
    match *val {
        Val::Uint(u) => Ok(u),
        Val::Int(i) if i >= 0 => Ok(i as u64),
        _ => {
            error!("reduce: count operand is not an unsigned integer: {}", val);
            Err(TreeError::TypeMismatch(format!(
                "count operand is not an unsigned integer: {}",
                val
            )))
        }
    }
}

fn mismatch(left: &Val, right: &Val, op: &str) -> Result<Val, TreeError> {
    error!(
        "reduce: incompatible operands {:?} and {:?} under {}",
        left.get_type(),
        right.get_type(),
        op
    );
    bail!(
        TreeError::TypeMismatch,
        "cannot {} {:?} and {:?}",
        op,
        left.get_type(),
        right.get_type()
    )
}
