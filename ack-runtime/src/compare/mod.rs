//! Structural difference between two snapshots of the same resource kind.
//!
//! A [`Delta`] lists field-level differences in a stable order. An empty delta
//! between desired and observed state is the convergence signal.

mod fields;

pub use fields::{delta_of, to_value, Equality, Field};

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Dotted path naming a field, e.g. `Spec.Tags`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Path(Vec<String>);

impl Path {
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// True if `self` equals `prefix` or lies below it.
    pub fn contains(&self, prefix: &Path) -> bool {
        prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// One differing field. `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difference {
    pub path: Path,
    pub a: Option<Value>,
    pub b: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    differences: Vec<Difference>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, a: Option<Value>, b: Option<Value>) {
        self.differences.push(Difference {
            path: Path::parse(path),
            a,
            b,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }

    pub fn differences(&self) -> &[Difference] {
        &self.differences
    }

    /// True if any difference lies at or below `subject`.
    pub fn different_at(&self, subject: &str) -> bool {
        let subject = Path::parse(subject);
        self.differences.iter().any(|d| d.path.contains(&subject))
    }

    /// True if any difference lies outside all of `subjects`.
    pub fn different_except(&self, subjects: &[&str]) -> bool {
        let excluded: Vec<Path> = subjects.iter().map(|s| Path::parse(s)).collect();
        self.differences
            .iter()
            .any(|d| !excluded.iter().any(|e| d.path.contains(e)))
    }

    pub fn paths(&self) -> Vec<String> {
        self.differences.iter().map(|d| d.path.to_string()).collect()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.paths().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_contains() {
        let tags = Path::parse("Spec.Tags");
        assert!(Path::parse("Spec.Tags.env").contains(&tags));
        assert!(Path::parse("Spec.Tags").contains(&tags));
        assert!(!Path::parse("Spec.TagsExtra").contains(&tags));
        assert!(!Path::parse("Spec").contains(&tags));
    }

    #[test]
    fn test_different_at_and_except() {
        let mut delta = Delta::new();
        delta.add("Spec.Size", Some(json!(3)), Some(json!(1)));
        delta.add("Spec.Tags", Some(json!({"env": "prod"})), None);

        assert!(delta.different_at("Spec"));
        assert!(delta.different_at("Spec.Size"));
        assert!(!delta.different_at("Spec.Name"));
        assert!(delta.different_except(&["Spec.Tags"]));
        assert!(!delta.different_except(&["Spec.Tags", "Spec.Size"]));
        assert_eq!(delta.to_string(), "Spec.Size, Spec.Tags");
    }
}
