//! Stable test-case identity.
//!
//! A test case's hash is either a SHA-256 hex digest over selected fields or
//! the verbatim output of a user function. Hashes key every report about a
//! test case, so they must be deterministic across processes and unique
//! within a suite.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

/// User-supplied hash function.
pub type HashFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// How a test case's identity is derived.
pub enum IdentityStrategy<T> {
    /// Digest of the JSON encoding of these fields, concatenated in order.
    Fields(Vec<String>),
    /// Return value used verbatim.
    Custom(HashFn<T>),
}

impl<T> IdentityStrategy<T> {
    /// Hash over the named fields.
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IdentityStrategy::Fields(fields.into_iter().map(Into::into).collect())
    }

    /// Hash with a user function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        IdentityStrategy::Custom(Arc::new(f))
    }
}

impl<T> Clone for IdentityStrategy<T> {
    fn clone(&self) -> Self {
        match self {
            IdentityStrategy::Fields(fields) => IdentityStrategy::Fields(fields.clone()),
            IdentityStrategy::Custom(f) => IdentityStrategy::Custom(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for IdentityStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStrategy::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            IdentityStrategy::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Compute the identity hash of one test case.
///
/// For field lists, an absent field contributes nothing to the digest
/// input; present fields contribute their compact JSON encoding.
pub fn hash<T: Serialize>(test_case: &T, strategy: &IdentityStrategy<T>) -> EngineResult<String> {
    match strategy {
        IdentityStrategy::Fields(fields) => {
            if fields.is_empty() {
                return Err(EngineError::Validation(
                    "identity field list must not be empty".to_string(),
                ));
            }
            let value = serde_json::to_value(test_case)?;
            let mut hasher = Sha256::new();
            for field in fields {
                if let Some(v) = value.get(field) {
                    hasher.update(serde_json::to_string(v)?.as_bytes());
                }
            }
            Ok(hex::encode(hasher.finalize()))
        }
        IdentityStrategy::Custom(f) => Ok(f(test_case)),
    }
}

/// Hash every test case, in order, rejecting empty or duplicate hashes.
pub fn hash_all<T: Serialize>(
    test_cases: &[T],
    strategy: &IdentityStrategy<T>,
) -> EngineResult<Vec<String>> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(test_cases.len());
    let mut hashes = Vec::with_capacity(test_cases.len());

    for (index, case) in test_cases.iter().enumerate() {
        let h = hash(case, strategy)?;
        if h.is_empty() {
            return Err(EngineError::Validation(format!(
                "test case {index} produced an empty hash"
            )));
        }
        if let Some(first) = seen.insert(h.clone(), index) {
            return Err(EngineError::Validation(format!(
                "duplicate test case hash {h} (cases {first} and {index})"
            )));
        }
        hashes.push(h);
    }

    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_hash_is_deterministic() {
        let strategy = IdentityStrategy::fields(["x", "y"]);
        let case = json!({"x": 1, "y": 2});
        let a = hash(&case, &strategy).unwrap();
        let b = hash(&case, &strategy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_field_hash_golden_value() {
        // sha256("12")
        let strategy = IdentityStrategy::fields(["x", "y"]);
        let h = hash(&json!({"x": 1, "y": 2}), &strategy).unwrap();
        assert_eq!(
            h,
            "6b51d431df5d7f141cbececcf79edf3dd861c3b4069f0b11661a3eefacbba918"
        );
    }

    #[test]
    fn test_field_order_matters() {
        let case = json!({"x": 1, "y": 2});
        let xy = hash(&case, &IdentityStrategy::fields(["x", "y"])).unwrap();
        let yx = hash(&case, &IdentityStrategy::fields(["y", "x"])).unwrap();
        assert_ne!(xy, yx);
    }

    #[test]
    fn test_unselected_fields_are_ignored() {
        let strategy = IdentityStrategy::fields(["input"]);
        let a = hash(&json!({"input": "hi", "expected": "a"}), &strategy).unwrap();
        let b = hash(&json!({"input": "hi", "expected": "b"}), &strategy).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_encoding_distinguishes_types() {
        let strategy = IdentityStrategy::fields(["v"]);
        let number = hash(&json!({"v": 1}), &strategy).unwrap();
        let string = hash(&json!({"v": "1"}), &strategy).unwrap();
        assert_ne!(number, string);
    }

    #[test]
    fn test_custom_hash_is_verbatim() {
        let strategy = IdentityStrategy::custom(|c: &serde_json::Value| {
            c["id"].as_str().unwrap_or_default().to_string()
        });
        assert_eq!(hash(&json!({"id": "case-7"}), &strategy).unwrap(), "case-7");
    }

    #[test]
    fn test_empty_field_list_is_rejected() {
        let strategy: IdentityStrategy<serde_json::Value> = IdentityStrategy::Fields(vec![]);
        assert!(matches!(
            hash(&json!({}), &strategy),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_hash_all_rejects_duplicates() {
        let strategy = IdentityStrategy::fields(["x"]);
        let cases = vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 1})];
        let err = hash_all(&cases, &strategy).unwrap_err();
        assert!(err.to_string().contains("cases 0 and 2"), "{err}");
    }

    #[test]
    fn test_hash_all_rejects_empty_custom_hash() {
        let strategy = IdentityStrategy::custom(|_: &serde_json::Value| String::new());
        let err = hash_all(&[json!({})], &strategy).unwrap_err();
        assert!(err.to_string().contains("empty hash"));
    }

    #[test]
    fn test_hash_all_preserves_case_order() {
        let strategy = IdentityStrategy::custom(|c: &serde_json::Value| c["id"].to_string());
        let cases = vec![json!({"id": 3}), json!({"id": 1})];
        assert_eq!(hash_all(&cases, &strategy).unwrap(), vec!["3", "1"]);
    }
}
