//! Record identity and page shapes
//!
//! Upstream pages are either a bare JSON array or an envelope object
//! `{ "data": [...], "total": n, "meta": {...} }`. Each record gets an
//! identity key used both to dedupe the persistence queue and to detect
//! repeated rows while paginating.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Resolves a record to its identity key.
///
/// The first configured field present on the record with a string or number
/// value wins; the key is tagged with the value's type so `1` and `"1"` stay
/// distinct. Fields may be dotted paths (`case.id`). Records with none of the
/// fields fall back to a SHA-256 digest of their JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolver {
    fields: Vec<String>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            fields: vec!["id".to_string()],
        }
    }
}

impl IdentityResolver {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields
            .into_iter()
            .map(Into::into)
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            return Self::default();
        }
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn identity(&self, record: &Value) -> String {
        for field in &self.fields {
            let pointer = format!("/{}", field.replace('.', "/"));
            match record.pointer(&pointer) {
                Some(Value::String(s)) if !s.is_empty() => return format!("{field}:s:{s}"),
                Some(Value::Number(n)) => return format!("{field}:n:{n}"),
                _ => {}
            }
        }
        // serde_json maps keep keys sorted, so the encoding is canonical
        format!("sha256:{:x}", Sha256::digest(record.to_string().as_bytes()))
    }
}

/// Records on one page. Unrecognized shapes are an empty page.
pub fn page_records(page: &Value) -> &[Value] {
    match page {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    }
}

/// Total advertised by an envelope (`total` or `meta.total`), if any.
pub fn reported_total(page: &Value) -> Option<u64> {
    page.get("total")
        .and_then(Value::as_u64)
        .or_else(|| page.pointer("/meta/total").and_then(Value::as_u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_field_is_used_when_present() {
        let resolver = IdentityResolver::default();
        assert_eq!(resolver.identity(&json!({"id": 42, "name": "x"})), "id:n:42");
        assert_eq!(resolver.identity(&json!({"id": "abc"})), "id:s:abc");
    }

    #[test]
    fn numeric_and_string_ids_do_not_collide() {
        let resolver = IdentityResolver::default();
        assert_ne!(
            resolver.identity(&json!({"id": 1})),
            resolver.identity(&json!({"id": "1"}))
        );
    }

    #[test]
    fn first_matching_field_wins() {
        let resolver = IdentityResolver::new(["docket", "id"]);
        assert_eq!(resolver.identity(&json!({"id": 1, "docket": "23-cv-1"})), "docket:s:23-cv-1");
        assert_eq!(resolver.identity(&json!({"id": 1})), "id:n:1");
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        let resolver = IdentityResolver::new(["case.id"]);
        assert_eq!(resolver.identity(&json!({"case": {"id": 7}})), "case.id:n:7");
    }

    #[test]
    fn missing_identity_falls_back_to_content_hash() {
        let resolver = IdentityResolver::default();
        let a = resolver.identity(&json!({"name": "x", "court": "9th"}));
        let b = resolver.identity(&json!({"court": "9th", "name": "x"}));
        assert!(a.starts_with("sha256:"));
        assert_eq!(a, b, "key order must not matter");
        assert_ne!(a, resolver.identity(&json!({"name": "y", "court": "9th"})));
    }

    #[test]
    fn null_and_object_ids_are_ignored() {
        let resolver = IdentityResolver::default();
        assert!(resolver.identity(&json!({"id": null})).starts_with("sha256:"));
        assert!(resolver.identity(&json!({"id": {"n": 1}})).starts_with("sha256:"));
    }

    #[test]
    fn blank_field_list_uses_default() {
        assert_eq!(IdentityResolver::new(["", " "]).fields(), ["id"]);
    }

    #[test]
    fn page_shapes() {
        assert_eq!(page_records(&json!([1, 2, 3])).len(), 3);
        assert_eq!(page_records(&json!({"data": [1, 2], "total": 9})).len(), 2);
        assert!(page_records(&json!({"results": [1]})).is_empty());
        assert!(page_records(&json!("nope")).is_empty());
        assert!(page_records(&Value::Null).is_empty());
    }

    #[test]
    fn reported_total_reads_envelope() {
        assert_eq!(reported_total(&json!({"data": [], "total": 12})), Some(12));
        assert_eq!(reported_total(&json!({"data": [], "meta": {"total": 5}})), Some(5));
        assert_eq!(reported_total(&json!([1, 2])), None);
    }
}
