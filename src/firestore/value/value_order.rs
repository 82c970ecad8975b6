//! Total ordering over [`FirestoreValue`]s following the backend's documented
//! cross-type ordering:
//!
//! null < booleans < numbers < timestamps < strings < bytes < references
//! < geo points < arrays < maps
//!
//! Integers and doubles share one numeric domain. `NaN` sorts before every other
//! number and equals itself; `-0.0` equals `0.0`.

use std::cmp::Ordering;

use crate::firestore::model::GeoPoint;
use crate::firestore::value::{FirestoreValue, MapValue, ValueKind};

// 2^63 is exactly representable as an f64 while i64::MAX is not.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Position of a value's kind in the cross-type ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeOrder {
    Null,
    Boolean,
    Number,
    Timestamp,
    String,
    Bytes,
    Reference,
    GeoPoint,
    Array,
    Map,
}

impl TypeOrder {
    pub fn of(value: &FirestoreValue) -> Self {
        match value.kind() {
            ValueKind::Null => TypeOrder::Null,
            ValueKind::Boolean(_) => TypeOrder::Boolean,
            ValueKind::Integer(_) | ValueKind::Double(_) => TypeOrder::Number,
            ValueKind::Timestamp(_) => TypeOrder::Timestamp,
            ValueKind::String(_) => TypeOrder::String,
            ValueKind::Bytes(_) => TypeOrder::Bytes,
            ValueKind::Reference(_) => TypeOrder::Reference,
            ValueKind::GeoPoint(_) => TypeOrder::GeoPoint,
            ValueKind::Array(_) => TypeOrder::Array,
            ValueKind::Map(_) => TypeOrder::Map,
        }
    }
}

pub fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Ordering {
    let by_type = TypeOrder::of(left).cmp(&TypeOrder::of(right));
    if by_type.is_ne() {
        return by_type;
    }

    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => Ordering::Equal,
        (ValueKind::Boolean(l), ValueKind::Boolean(r)) => l.cmp(r),
        (ValueKind::Integer(l), ValueKind::Integer(r)) => l.cmp(r),
        (ValueKind::Double(l), ValueKind::Double(r)) => compare_doubles(*l, *r),
        (ValueKind::Integer(l), ValueKind::Double(r)) => compare_integer_to_double(*l, *r),
        (ValueKind::Double(l), ValueKind::Integer(r)) => {
            compare_integer_to_double(*r, *l).reverse()
        }
        (ValueKind::Timestamp(l), ValueKind::Timestamp(r)) => l.cmp(r),
        (ValueKind::String(l), ValueKind::String(r)) => l.cmp(r),
        (ValueKind::Bytes(l), ValueKind::Bytes(r)) => l.as_slice().cmp(r.as_slice()),
        (ValueKind::Reference(l), ValueKind::Reference(r)) => l.cmp(r),
        (ValueKind::GeoPoint(l), ValueKind::GeoPoint(r)) => compare_geo_points(l, r),
        (ValueKind::Array(l), ValueKind::Array(r)) => compare_arrays(l.values(), r.values()),
        (ValueKind::Map(l), ValueKind::Map(r)) => compare_maps(l, r),
        // Same TypeOrder guarantees one of the arms above matched.
        _ => Ordering::Equal,
    }
}

/// `true` when both values compare equal under [`compare_values`].
pub fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    compare_values(left, right).is_eq()
}

fn compare_doubles(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

fn compare_integer_to_double(integer: i64, double: f64) -> Ordering {
    if double.is_nan() {
        return Ordering::Greater;
    }
    if double < -TWO_POW_63 {
        return Ordering::Greater;
    }
    if double >= TWO_POW_63 {
        return Ordering::Less;
    }

    let whole = double.trunc();
    match integer.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let fraction = double - whole;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

fn compare_geo_points(left: &GeoPoint, right: &GeoPoint) -> Ordering {
    compare_doubles(left.latitude(), right.latitude())
        .then_with(|| compare_doubles(left.longitude(), right.longitude()))
}

fn compare_arrays(left: &[FirestoreValue], right: &[FirestoreValue]) -> Ordering {
    left.iter()
        .zip(right.iter())
        .map(|(l, r)| compare_values(l, r))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
}

fn compare_maps(left: &MapValue, right: &MapValue) -> Ordering {
    // BTreeMap iteration is already in ascending key order.
    let mut left_entries = left.fields().iter();
    let mut right_entries = right.fields().iter();
    loop {
        match (left_entries.next(), right_entries.next()) {
            (Some((left_key, left_value)), Some((right_key, right_value))) => {
                let ordering = left_key
                    .cmp(right_key)
                    .then_with(|| compare_values(left_value, right_value));
                if ordering.is_ne() {
                    return ordering;
                }
            }
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::{ResourcePath, Timestamp};
    use crate::firestore::value::BytesValue;
    use std::collections::BTreeMap;

    fn map(entries: &[(&str, FirestoreValue)]) -> FirestoreValue {
        FirestoreValue::from_map(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    /// Groups of values; values within a group are equal, groups ascend.
    fn ordered_groups() -> Vec<Vec<FirestoreValue>> {
        vec![
            vec![FirestoreValue::null()],
            vec![FirestoreValue::from(false)],
            vec![FirestoreValue::from(true)],
            vec![FirestoreValue::from(f64::NAN)],
            vec![FirestoreValue::from(f64::NEG_INFINITY)],
            vec![FirestoreValue::from(i64::MIN)],
            vec![FirestoreValue::from(-1.5)],
            vec![
                FirestoreValue::from(0),
                FirestoreValue::from(0.0),
                FirestoreValue::from(-0.0),
            ],
            vec![FirestoreValue::from(0.5)],
            vec![FirestoreValue::from(1), FirestoreValue::from(1.0)],
            vec![FirestoreValue::from(i64::MAX)],
            vec![FirestoreValue::from(f64::INFINITY)],
            vec![FirestoreValue::from(Timestamp::new(1, 0))],
            vec![FirestoreValue::from(Timestamp::new(1, 1))],
            vec![FirestoreValue::from("")],
            vec![FirestoreValue::from("a")],
            vec![FirestoreValue::from("ab")],
            vec![FirestoreValue::from("b")],
            vec![FirestoreValue::from_bytes(Vec::new())],
            vec![FirestoreValue::from_bytes(vec![0x01])],
            vec![FirestoreValue::from_bytes(vec![0x01, 0x00])],
            vec![FirestoreValue::from_bytes(BytesValue::from(vec![0xff]))],
            vec![FirestoreValue::from_reference(ResourcePath::from_segments(["a", "b"]))],
            vec![FirestoreValue::from_reference(ResourcePath::from_segments(["a", "b", "c", "d"]))],
            vec![FirestoreValue::from_reference(ResourcePath::from_segments(["b", "a"]))],
            vec![FirestoreValue::from(GeoPoint::new(-10.0, 0.0).unwrap())],
            vec![FirestoreValue::from(GeoPoint::new(-10.0, 5.0).unwrap())],
            vec![FirestoreValue::from(GeoPoint::new(10.0, -5.0).unwrap())],
            vec![FirestoreValue::from_array(Vec::new())],
            vec![FirestoreValue::from_array(vec![FirestoreValue::null()])],
            vec![FirestoreValue::from_array(vec![FirestoreValue::from(1)])],
            vec![FirestoreValue::from_array(vec![
                FirestoreValue::from(1),
                FirestoreValue::from("x"),
            ])],
            vec![FirestoreValue::from_array(vec![FirestoreValue::from(2)])],
            vec![map(&[])],
            vec![map(&[("a", FirestoreValue::from(1))])],
            vec![map(&[("a", FirestoreValue::from(1)), ("b", FirestoreValue::from(0))])],
            vec![map(&[("a", FirestoreValue::from(2))])],
            vec![map(&[("b", FirestoreValue::null())])],
        ]
    }

    #[test]
    fn groups_are_totally_ordered() {
        let groups = ordered_groups();
        for (i, left_group) in groups.iter().enumerate() {
            for (j, right_group) in groups.iter().enumerate() {
                for left in left_group {
                    for right in right_group {
                        assert_eq!(
                            compare_values(left, right),
                            i.cmp(&j),
                            "comparing {left:?} with {right:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn nan_sorts_first_among_numbers() {
        let nan = FirestoreValue::from(f64::NAN);
        for other in [
            FirestoreValue::from(f64::NEG_INFINITY),
            FirestoreValue::from(i64::MIN),
            FirestoreValue::from(0),
        ] {
            assert_eq!(compare_values(&nan, &other), Ordering::Less);
        }
        assert!(values_equal(&nan, &FirestoreValue::from(f64::NAN)));
    }

    #[test]
    fn integer_double_comparison_is_exact() {
        // 2^53 + 1 is not representable as f64; the integer must still sort above 2^53.
        let big = FirestoreValue::from(9_007_199_254_740_993_i64);
        let double = FirestoreValue::from(9_007_199_254_740_992.0);
        assert_eq!(compare_values(&big, &double), Ordering::Greater);
        assert_eq!(compare_values(&double, &big), Ordering::Less);
        assert_eq!(
            compare_values(&FirestoreValue::from(i64::MAX), &FirestoreValue::from(TWO_POW_63)),
            Ordering::Less
        );
    }
}
