//! Stable cache-key fingerprinting (spec §4.6 `fingerprint`). Node ids are
//! sorted before hashing so candidate-set order never affects the key, and
//! options are serialized through `serde_json`'s canonical (sorted-key) map
//! encoding for the same reason.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash of `query`, the sorted candidate node ids, and the options payload.
/// Uses `sha2` rather than `md5` — the corpus carries no `md5` crate and
/// `sha2` is already a dependency of the auth module.
pub fn fingerprint(query: &str, node_ids: &[Uuid], options: &serde_json::Value) -> String {
    let mut sorted_ids: Vec<String> = node_ids.iter().map(|id| id.to_string()).collect();
    sorted_ids.sort();

    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(sorted_ids.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(options).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_id_order_does_not_affect_fingerprint() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let f1 = fingerprint("hello", &[a, b], &json!({}));
        let f2 = fingerprint("hello", &[b, a], &json!({}));
        assert_eq!(f1, f2);
    }

    #[test]
    fn object_key_order_does_not_affect_fingerprint() {
        let a = Uuid::new_v4();
        let f1 = fingerprint("q", &[a], &json!({"x": 1, "y": 2}));
        let f2 = fingerprint("q", &[a], &json!({"y": 2, "x": 1}));
        assert_eq!(f1, f2);
    }

    #[test]
    fn different_queries_fingerprint_differently() {
        let a = Uuid::new_v4();
        let f1 = fingerprint("hello", &[a], &json!({}));
        let f2 = fingerprint("world", &[a], &json!({}));
        assert_ne!(f1, f2);
    }
}
