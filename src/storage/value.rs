// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Column values and their total order.

use std::cmp::Ordering;
use std::fmt;

/// A dynamically typed column value.
///
/// Values of different types order by type rank first
/// (`Null < Boolean < numeric < Text < Bytes < Array`); `Long` and `Double`
/// share the numeric rank and compare by magnitude.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    /// Smallest row id, used as the lower sentinel of open-ended scans.
    pub const MIN_LONG: Value = Value::Long(i64::MIN);

    /// Largest row id, used as the upper sentinel of open-ended scans.
    pub const MAX_LONG: Value = Value::Long(i64::MAX);

    /// Returns true for SQL NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts the value to a 64-bit integer, if it has an exact integer form.
    pub fn to_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Double(d)
                if d.is_finite()
                    && d.fract() == 0.0
                    && *d >= i64::MIN as f64
                    && *d < i64::MAX as f64 =>
            {
                Some(*d as i64)
            }
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the elements of an array value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Consumes an array value, returning its elements.
    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Long(_) | Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Array(_) => 5,
        }
    }
}

/// Exact comparison of an integer with a float.
fn compare_long_double(l: i64, d: f64) -> Ordering {
    match (l as f64).total_cmp(&d) {
        // Equal as floats means `d` is integral and in range, so the
        // widening cast is exact and breaks ties lost to rounding.
        Ordering::Equal => (l as i128).cmp(&(d as i128)),
        other => other,
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Long(a), Value::Double(b)) => compare_long_double(*a, *b),
            (Value::Double(a), Value::Long(b)) => compare_long_double(*b, *a).reverse(),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
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
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(bytes) => {
                f.write_str("X'")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                f.write_str("'")
            }
            Value::Array(values) => {
                f.write_str("(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_rank_order() {
        let mut values = vec![
            Value::from(vec![Value::Null]),
            Value::from(vec![1u8, 2]),
            Value::from("abc"),
            Value::Long(5),
            Value::Boolean(true),
            Value::Null,
        ];
        values.sort();

        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Boolean(true));
        assert_eq!(values[2], Value::Long(5));
        assert_eq!(values[3], Value::from("abc"));
        assert!(matches!(values[4], Value::Bytes(_)));
        assert!(matches!(values[5], Value::Array(_)));
    }

    #[test]
    fn test_long_double_compare() {
        assert_eq!(Value::Long(3), Value::Double(3.0));
        assert!(Value::Long(3) < Value::Double(3.5));
        assert!(Value::Double(-1.5) < Value::Long(-1));

        // Rounding must not collapse distinct integers.
        let big = 1i64 << 53;
        assert!(Value::Long(big + 1) > Value::Double(big as f64));
        assert_eq!(Value::Long(big), Value::Double(big as f64));
    }

    #[test]
    fn test_to_long() {
        assert_eq!(Value::Long(7).to_long(), Some(7));
        assert_eq!(Value::Double(7.0).to_long(), Some(7));
        assert_eq!(Value::Double(7.5).to_long(), None);
        assert_eq!(Value::from(" 42 ").to_long(), Some(42));
        assert_eq!(Value::Boolean(true).to_long(), Some(1));
        assert_eq!(Value::Null.to_long(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("it's").to_string(), "'it''s'");
        assert_eq!(Value::from(vec![0xabu8, 0x01]).to_string(), "X'ab01'");
        assert_eq!(
            Value::from(vec![Value::Long(1), Value::Null]).to_string(),
            "(1, NULL)"
        );
    }

    #[test]
    fn test_array_lexicographic() {
        let a = Value::from(vec![Value::Long(1), Value::Long(2)]);
        let b = Value::from(vec![Value::Long(1), Value::Long(3)]);
        let c = Value::from(vec![Value::Long(1)]);
        assert!(a < b);
        assert!(c < a);
    }
}
