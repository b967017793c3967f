//! Record intents: a record plus the provenance that declared it.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::record::Record;

/// A host's declaration that a record ought to exist.
///
/// `created` is the owning container's creation instant and is the
/// tiebreaker whenever two intents collide; `force` outranks age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIntent {
    /// Id of the container that declared the record.
    pub container_id: String,
    /// Name of the container that declared the record.
    pub container_name: String,
    /// Creation instant of the owning container.
    pub created: DateTime<Utc>,
    /// The host that owns the record.
    pub hostname: String,
    /// Claims priority over non-force competitors.
    pub force: bool,
    /// The record itself.
    pub record: Record,
}

impl RecordIntent {
    /// Identity key used to dedup intents across sources:
    /// `container_id|container_name|host|force|record.key`.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.container_id,
            self.container_name,
            self.hostname,
            self.force,
            self.record.key()
        )
    }

    /// Whether two intents are the same declaration.
    ///
    /// Matches the identity key: creation time is provenance, not identity,
    /// so it is deliberately excluded.
    pub fn same_identity(&self, other: &RecordIntent) -> bool {
        self.container_id == other.container_id
            && self.container_name == other.container_name
            && self.hostname == other.hostname
            && self.force == other.force
            && self.record == other.record
    }
}

impl fmt::Display for RecordIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (container_id={}, container_name={}, hostname={}, created={}, force={})",
            self.record,
            self.container_id,
            self.container_name,
            self.hostname,
            self.created.format("%Y-%m-%d %H:%M:%S"),
            self.force
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_intent(container_id: &str, force: bool) -> RecordIntent {
        RecordIntent {
            container_id: container_id.to_string(),
            container_name: "web".to_string(),
            created: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            hostname: "h1".to_string(),
            force,
            record: Record::a("web.example", "10.0.0.1").unwrap(),
        }
    }

    #[test]
    fn test_key_includes_provenance_and_record() {
        let intent = make_intent("c1", false);
        assert_eq!(intent.key(), "c1|web|h1|false|web.example|A|10.0.0.1");
    }

    #[test]
    fn test_same_identity_ignores_created() {
        let a = make_intent("c1", false);
        let mut b = a.clone();
        b.created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(a.same_identity(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_identity_differs_on_force() {
        let a = make_intent("c1", false);
        let b = make_intent("c1", true);
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn test_same_identity_differs_on_container() {
        let a = make_intent("c1", false);
        let b = make_intent("c2", false);
        assert!(!a.same_identity(&b));
    }
}
