//! etcd key layout and value schema for the SkyDNS registry.
//!
//! A record with FQDN `a.b.c` and index `N` lives at
//! `<prefix>/c/b/a/xN`; the value is a JSON object carrying everything but
//! the name, which is recovered from the key path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::intent::RecordIntent;
use crate::record::{Record, RecordKind};

/// The JSON value stored under a record key.
///
/// `host` holds the record's value (IP or CNAME target), matching the
/// SkyDNS message layout consumed by CoreDNS. `record_type` is decoded
/// case-insensitively for compatibility with older writers and always
/// encoded in canonical upper-case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    /// The record's value field.
    pub host: String,
    /// The record kind.
    pub record_type: RecordKind,
    /// Host that owns this record.
    pub owner_hostname: String,
    /// Id of the container that declared it.
    pub owner_container_id: String,
    /// Name of the container that declared it.
    pub owner_container_name: String,
    /// Creation instant of the owning container (RFC 3339).
    pub created: DateTime<Utc>,
    /// Priority flag for conflict resolution.
    pub force: bool,
}

impl WireRecord {
    /// Encode an intent's registry value.
    pub fn from_intent(intent: &RecordIntent) -> Self {
        Self {
            host: intent.record.value(),
            record_type: intent.record.kind(),
            owner_hostname: intent.hostname.clone(),
            owner_container_id: intent.container_id.clone(),
            owner_container_name: intent.container_name.clone(),
            created: intent.created,
            force: intent.force,
        }
    }

    /// Rebuild the intent from a decoded value plus the FQDN recovered from
    /// its key.
    pub fn into_intent(self, fqdn: &str) -> Result<RecordIntent, RecordError> {
        let record = Record::new(self.record_type, fqdn, &self.host)?;
        Ok(RecordIntent {
            container_id: self.owner_container_id,
            container_name: self.owner_container_name,
            created: self.created,
            hostname: self.owner_hostname,
            force: self.force,
            record,
        })
    }

    /// True when this stored record was written for `intent`: same value,
    /// kind, owner host and container name, plus container id when the
    /// intent carries one.
    pub fn matches(&self, intent: &RecordIntent) -> bool {
        self.host == intent.record.value()
            && self.record_type == intent.record.kind()
            && self.owner_hostname == intent.hostname
            && self.owner_container_name == intent.container_name
            && (intent.container_id.is_empty()
                || self.owner_container_id == intent.container_id)
    }
}

/// Key base for an FQDN: prefix plus the reversed labels as path segments.
pub fn key_base(prefix: &str, fqdn: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let reversed: Vec<&str> = fqdn
        .trim()
        .trim_end_matches('.')
        .split('.')
        .rev()
        .collect();
    format!("{}/{}", prefix, reversed.join("/"))
}

/// Recover an FQDN from a full record key: drop the prefix, drop a trailing
/// `xN` index segment if present, reverse the remaining segments and join
/// with dots.
pub fn fqdn_from_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = key.strip_prefix(prefix).unwrap_or(key);
    let mut segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.last().is_some_and(|s| index_of_segment(s).is_some()) {
        segments.pop();
    }
    segments.reverse();
    segments.join(".")
}

/// Parse an `x<decimal>` index segment; `None` for anything else.
pub fn index_of_segment(segment: &str) -> Option<u64> {
    let digits = segment.strip_prefix('x')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn intent() -> RecordIntent {
        RecordIntent {
            container_id: "c1".to_string(),
            container_name: "web".to_string(),
            created: Utc.timestamp_opt(100, 0).unwrap(),
            hostname: "h1".to_string(),
            force: false,
            record: Record::a("web.example", "10.0.0.1").unwrap(),
        }
    }

    #[test]
    fn test_key_base_reverses_labels() {
        assert_eq!(key_base("/skydns", "web.example"), "/skydns/example/web");
        assert_eq!(
            key_base("/skydns/", "a.b.example.com"),
            "/skydns/com/example/b/a"
        );
    }

    #[test]
    fn test_fqdn_from_key_drops_index() {
        assert_eq!(fqdn_from_key("/skydns", "/skydns/example/web/x1"), "web.example");
        assert_eq!(fqdn_from_key("/skydns", "/skydns/example/web/x12"), "web.example");
    }

    #[test]
    fn test_fqdn_from_key_without_index() {
        assert_eq!(fqdn_from_key("/skydns", "/skydns/example/web"), "web.example");
    }

    #[test]
    fn test_fqdn_with_x_label_survives() {
        // "x1" is a legal hostname label; only the trailing index segment
        // is dropped.
        assert_eq!(
            fqdn_from_key("/skydns", "/skydns/example/x1/x3"),
            "x1.example"
        );
        assert_eq!(
            fqdn_from_key("/skydns", &key_base("/skydns", "x1.example")),
            "example"
        );
    }

    #[test]
    fn test_index_of_segment() {
        assert_eq!(index_of_segment("x1"), Some(1));
        assert_eq!(index_of_segment("x42"), Some(42));
        assert_eq!(index_of_segment("x"), None);
        assert_eq!(index_of_segment("x1a"), None);
        assert_eq!(index_of_segment("web"), None);
        assert_eq!(index_of_segment("xyz"), None);
    }

    #[test]
    fn test_wire_round_trip() {
        let original = intent();
        let wire = WireRecord::from_intent(&original);
        let json = serde_json::to_string(&wire).unwrap();
        let decoded: WireRecord = serde_json::from_str(&json).unwrap();
        let rebuilt = decoded.into_intent("web.example").unwrap();
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn test_wire_encodes_canonical_kind() {
        let wire = WireRecord::from_intent(&intent());
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"record_type\":\"A\""));
    }

    #[test]
    fn test_wire_accepts_lowercase_kind() {
        let json = r#"{
            "host": "web.example",
            "record_type": "cname",
            "owner_hostname": "h2",
            "owner_container_id": "c9",
            "owner_container_name": "api",
            "created": "2024-05-01T12:00:00Z",
            "force": true
        }"#;
        let wire: WireRecord = serde_json::from_str(json).unwrap();
        assert_eq!(wire.record_type, RecordKind::Cname);
        let rebuilt = wire.into_intent("api.example").unwrap();
        assert!(rebuilt.force);
        assert!(rebuilt.record.is_cname());
    }

    #[test]
    fn test_matches_requires_owner_fields() {
        let local = intent();
        let wire = WireRecord::from_intent(&local);
        assert!(wire.matches(&local));

        let mut other_host = local.clone();
        other_host.hostname = "h2".to_string();
        assert!(!wire.matches(&other_host));

        let mut other_value = local.clone();
        other_value.record = Record::a("web.example", "10.0.0.2").unwrap();
        assert!(!wire.matches(&other_value));
    }

    #[test]
    fn test_matches_ignores_missing_container_id() {
        let local = intent();
        let wire = WireRecord::from_intent(&local);

        let mut no_id = local.clone();
        no_id.container_id = String::new();
        assert!(wire.matches(&no_id));

        let mut wrong_id = local;
        wrong_id.container_id = "c2".to_string();
        assert!(!wire.matches(&wrong_id));
    }
}
