//! Field tables: the per-kind list of convergence-relevant fields.

use serde::Serialize;
use serde_json::Value;

use super::Delta;

/// How two values of a field are compared. Every mode is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    /// Deep structural equality; absent and null/zero are distinct.
    Exact,
    /// Strings compare ASCII case-insensitively (e.g. ARNs).
    CaseInsensitive,
    /// Arrays compare as multisets.
    Unordered,
    /// Absent, null, "", [], {}, 0 and false are all equal.
    AbsentIsEmpty,
}

/// A convergence-relevant field of resource type `R`.
pub struct Field<R> {
    pub path: &'static str,
    pub extract: fn(&R) -> Option<Value>,
    pub equality: Equality,
}

impl<R> Field<R> {
    pub fn new(path: &'static str, extract: fn(&R) -> Option<Value>) -> Self {
        Self {
            path,
            extract,
            equality: Equality::Exact,
        }
    }

    pub fn with(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }
}

/// Serialize a field value for comparison.
pub fn to_value<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Compare `a` and `b` field by field, in declaration order.
pub fn delta_of<R>(fields: &[Field<R>], a: &R, b: &R) -> Delta {
    let mut delta = Delta::new();
    for field in fields {
        let va = (field.extract)(a);
        let vb = (field.extract)(b);
        if !equal(field.equality, va.as_ref(), vb.as_ref()) {
            delta.add(field.path, va, vb);
        }
    }
    delta
}

fn equal(equality: Equality, a: Option<&Value>, b: Option<&Value>) -> bool {
    match equality {
        Equality::Exact => a == b,
        Equality::CaseInsensitive => match (a, b) {
            (Some(Value::String(x)), Some(Value::String(y))) => x.eq_ignore_ascii_case(y),
            _ => a == b,
        },
        Equality::Unordered => match (a, b) {
            (Some(Value::Array(x)), Some(Value::Array(y))) => same_elements(x, y),
            _ => a == b,
        },
        Equality::AbsentIsEmpty => {
            let a_empty = a.map_or(true, is_empty_value);
            let b_empty = b.map_or(true, is_empty_value);
            if a_empty || b_empty {
                a_empty && b_empty
            } else {
                a == b
            }
        }
    }
}

fn same_elements(x: &[Value], y: &[Value]) -> bool {
    if x.len() != y.len() {
        return false;
    }
    let mut used = vec![false; y.len()];
    x.iter().all(|item| {
        match y
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && candidate == item)
        {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone)]
    struct Thing {
        name: String,
        size: Option<i64>,
        key_arn: Option<String>,
        zones: Vec<String>,
        note: Option<String>,
        updated_at: String,
    }

    fn fields() -> Vec<Field<Thing>> {
        vec![
            Field::new("Spec.Name", |t: &Thing| to_value(&t.name)),
            Field::new("Spec.Size", |t: &Thing| t.size.map(Value::from)),
            Field::new("Spec.KeyARN", |t: &Thing| t.key_arn.clone().map(Value::from))
                .with(Equality::CaseInsensitive),
            Field::new("Spec.Zones", |t: &Thing| to_value(&t.zones)).with(Equality::Unordered),
            Field::new("Spec.Note", |t: &Thing| t.note.clone().map(Value::from))
                .with(Equality::AbsentIsEmpty),
        ]
    }

    fn thing() -> Thing {
        Thing {
            name: "x".into(),
            size: Some(3),
            key_arn: Some("arn:aws:kms:us-east-1:1:key/Abc".into()),
            zones: vec!["a".into(), "b".into()],
            note: None,
            updated_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_delta_with_itself_is_empty() {
        let a = thing();
        assert!(delta_of(&fields(), &a, &a).is_empty());
    }

    #[test]
    fn test_fields_outside_the_table_are_ignored() {
        let a = thing();
        let mut b = thing();
        b.updated_at = "2025-06-01T00:00:00Z".into();
        assert!(delta_of(&fields(), &a, &b).is_empty());
    }

    #[test]
    fn test_single_difference() {
        let a = thing();
        let mut b = thing();
        b.size = Some(1);

        let delta = delta_of(&fields(), &a, &b);
        assert_eq!(delta.paths(), vec!["Spec.Size"]);
        assert_eq!(delta.differences()[0].a, Some(json!(3)));
        assert_eq!(delta.differences()[0].b, Some(json!(1)));
    }

    #[test]
    fn test_absent_and_zero_are_distinct_under_exact() {
        let a = thing();
        let mut b = thing();
        b.size = None;
        let mut c = thing();
        c.size = Some(0);

        assert_eq!(delta_of(&fields(), &b, &c).paths(), vec!["Spec.Size"]);
        assert_eq!(delta_of(&fields(), &a, &b).differences()[0].b, None);
    }

    #[test]
    fn test_absent_is_empty_mode() {
        let a = thing();
        let mut b = thing();
        b.note = Some(String::new());
        assert!(delta_of(&fields(), &a, &b).is_empty());

        b.note = Some("hello".into());
        assert_eq!(delta_of(&fields(), &a, &b).paths(), vec!["Spec.Note"]);
    }

    #[test]
    fn test_semantic_equality_modes() {
        let a = thing();
        let mut b = thing();
        b.key_arn = Some("ARN:AWS:KMS:US-EAST-1:1:KEY/ABC".into());
        b.zones = vec!["b".into(), "a".into()];
        assert!(delta_of(&fields(), &a, &b).is_empty());

        b.zones = vec!["a".into(), "a".into()];
        assert_eq!(delta_of(&fields(), &a, &b).paths(), vec!["Spec.Zones"]);
    }

    #[test]
    fn test_symmetric_and_ordered() {
        let a = thing();
        let mut b = thing();
        b.name = "y".into();
        b.size = Some(9);
        b.zones = vec!["c".into()];

        let ab = delta_of(&fields(), &a, &b);
        let ba = delta_of(&fields(), &b, &a);
        assert_eq!(ab.paths(), vec!["Spec.Name", "Spec.Size", "Spec.Zones"]);
        assert_eq!(ab.paths(), ba.paths());
        assert_eq!(ab.differences()[1].a, ba.differences()[1].b);

        let again = delta_of(&fields(), &a, &b);
        assert_eq!(
            serde_json::to_string(&ab).unwrap(),
            serde_json::to_string(&again).unwrap()
        );
    }
}
