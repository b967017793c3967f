//! Replacement predicates shared by the intra-host filter and the global
//! reconciler.
//!
//! Both conflict-resolution passes answer the same two questions: does one
//! intent displace another, and does a CNAME displace a whole set of address
//! records. The rules are pure functions of `force` and container age;
//! `force` outranks age, and "older" is strict (`<`) so equal timestamps
//! never win.

use crate::intent::RecordIntent;

/// True if `new` should take precedence over `existing`.
pub fn should_replace_existing(new: &RecordIntent, existing: &RecordIntent) -> bool {
    if new.force && !existing.force {
        return true;
    }
    if !new.force && existing.force {
        return false;
    }
    new.created < existing.created
}

/// True if `new` (a CNAME) should replace all of `existing` (address
/// records at the same name).
///
/// Rules:
/// - Empty existing: new wins.
/// - Any existing is force and new is not: new loses.
/// - New is force and no existing is: new wins.
/// - New is force against a mixed set: new must be strictly older than
///   every force-flagged existing.
/// - Force flags uniform on both sides: new must be strictly older than
///   every existing.
pub fn should_replace_all_existing(new: &RecordIntent, existing: &[&RecordIntent]) -> bool {
    if existing.is_empty() {
        return true;
    }

    let any_force = existing.iter().any(|r| r.force);
    let all_force = existing.iter().all(|r| r.force);

    if any_force && !new.force {
        return false;
    }

    if new.force && !any_force {
        return true;
    }

    if new.force && !all_force {
        return existing
            .iter()
            .filter(|r| r.force)
            .all(|r| new.created < r.created);
    }

    existing.iter().all(|r| new.created < r.created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn intent(created: i64, force: bool) -> RecordIntent {
        RecordIntent {
            container_id: format!("c{created}"),
            container_name: "web".to_string(),
            created: at(created),
            hostname: "h1".to_string(),
            force,
            record: Record::a("web.example", "10.0.0.1").unwrap(),
        }
    }

    #[test]
    fn test_force_beats_non_force() {
        assert!(should_replace_existing(&intent(200, true), &intent(100, false)));
        assert!(!should_replace_existing(&intent(100, false), &intent(200, true)));
    }

    #[test]
    fn test_age_breaks_tie_when_force_matches() {
        assert!(should_replace_existing(&intent(100, false), &intent(200, false)));
        assert!(!should_replace_existing(&intent(200, false), &intent(100, false)));
        assert!(should_replace_existing(&intent(100, true), &intent(200, true)));
    }

    #[test]
    fn test_equal_timestamps_do_not_win() {
        assert!(!should_replace_existing(&intent(100, false), &intent(100, false)));
        assert!(!should_replace_existing(&intent(100, true), &intent(100, true)));
    }

    #[test]
    fn test_replace_all_empty_existing_wins() {
        let new = intent(100, false);
        assert!(should_replace_all_existing(&new, &[]));
    }

    #[test]
    fn test_replace_all_force_existing_beats_non_force_new() {
        let new = intent(10, false);
        let e1 = intent(50, true);
        let e2 = intent(5, false);
        assert!(!should_replace_all_existing(&new, &[&e1, &e2]));
    }

    #[test]
    fn test_replace_all_force_new_beats_all_non_force() {
        let new = intent(500, true);
        let e1 = intent(50, false);
        let e2 = intent(5, false);
        assert!(should_replace_all_existing(&new, &[&e1, &e2]));
    }

    #[test]
    fn test_replace_all_mixed_force_needs_age_win_over_force_records() {
        let new = intent(10, true);
        let forced = intent(50, true);
        let plain = intent(5, false);
        assert!(should_replace_all_existing(&new, &[&forced, &plain]));

        let new_too_young = intent(60, true);
        assert!(!should_replace_all_existing(&new_too_young, &[&forced, &plain]));
    }

    #[test]
    fn test_replace_all_uniform_force_oldest_wins() {
        let new = intent(10, false);
        let e1 = intent(50, false);
        let e2 = intent(20, false);
        assert!(should_replace_all_existing(&new, &[&e1, &e2]));

        let new_middle = intent(30, false);
        assert!(!should_replace_all_existing(&new_middle, &[&e1, &e2]));
    }
}
