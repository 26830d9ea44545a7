//! Ordered scalar values used as chunk boundaries and row components.
//!
//! The ordering matches what the storage engine uses for the column types
//! that appear in primary keys, so a resume point computed in memory selects
//! the same suffix of rows as the SQL predicate built from it.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A nullable scalar value read from, or sent to, a tablet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// A row, positionally aligned with `TableDescriptor::columns`.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Kinds that never compare by content order by this rank.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
        }
    }

    /// Append the value as a SQL literal to `out`.
    ///
    /// Literals keep the ordering of the in-memory value: integers are written
    /// verbatim, strings are single-quoted with embedded quotes doubled and
    /// byte strings use the Postgres hex `bytea` form.
    pub fn encode_sql(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("NULL"),
            Value::Bool(true) => out.push_str("TRUE"),
            Value::Bool(false) => out.push_str("FALSE"),
            Value::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            Value::UInt(v) => {
                let _ = write!(out, "{}", v);
            }
            Value::Float(v) => {
                if v.is_nan() {
                    out.push_str("'NaN'::float8");
                } else if v.is_infinite() {
                    let sign = if *v < 0.0 { "-" } else { "" };
                    let _ = write!(out, "'{}Infinity'::float8", sign);
                } else {
                    let _ = write!(out, "{}", v);
                }
            }
            Value::Str(s) => {
                out.push('\'');
                out.push_str(&sanitize_sql_string(s));
                out.push('\'');
            }
            Value::Bytes(b) => {
                out.push_str("'\\x");
                for byte in b {
                    let _ = write!(out, "{:02x}", byte);
                }
                out.push_str("'::bytea");
            }
        }
    }

    pub fn to_sql_literal(&self) -> String {
        let mut out = String::new();
        self.encode_sql(&mut out);
        out
    }
}

fn sanitize_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn cmp_numeric(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => {
            if *x < 0 {
                Ordering::Less
            } else {
                (*x as u64).cmp(y)
            }
        }
        (Value::UInt(_), Value::Int(_)) => cmp_numeric(b, a).reverse(),
        (Value::Float(x), Value::Float(y)) => cmp_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => cmp_float_int(*x, i128::from(*y)),
        (Value::Float(x), Value::UInt(y)) => cmp_float_int(*x, i128::from(*y)),
        (Value::Int(_) | Value::UInt(_), Value::Float(_)) => cmp_numeric(b, a).reverse(),
        _ => a.rank().cmp(&b.rank()),
    }
}

/// Float order as the storage engine sees it: `-0.0 == 0.0`, and every NaN
/// is one value greater than all others.
fn cmp_float(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of a float with an integer, without rounding `y`.
fn cmp_float_int(x: f64, y: i128) -> Ordering {
    // Every i64 and u64 lies strictly within +/- 2^64.
    const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;
    if x.is_nan() || x >= TWO_POW_64 {
        return Ordering::Greater;
    }
    if x <= -TWO_POW_64 {
        return Ordering::Less;
    }
    let whole = x.trunc();
    match (whole as i128).cmp(&y) {
        Ordering::Equal => x.partial_cmp(&whole).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => cmp_numeric(self, other),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
