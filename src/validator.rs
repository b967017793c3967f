//! Validation of a proposed record against a simulated registry state.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::ValidationError;
use crate::intent::RecordIntent;
use crate::record::Record;

/// Validate `new` against `existing` (typically the simulated post-state,
/// excluding `new` itself).
///
/// Rules:
/// 1. An address record may not join a name holding a CNAME.
/// 2. A CNAME may not join a name holding address records.
/// 3. At most one CNAME per name.
/// 4. Address records at one name must have distinct values.
/// 5. CNAMEs may not form resolution cycles.
pub fn validate_record(
    new: &Record,
    existing: &[RecordIntent],
) -> Result<(), ValidationError> {
    let same_name: Vec<&Record> = existing
        .iter()
        .map(|intent| &intent.record)
        .filter(|record| record.name() == new.name())
        .collect();
    let has_address = same_name.iter().any(|record| record.is_address());
    let has_cname = same_name.iter().any(|record| record.is_cname());

    if new.is_address() {
        if has_cname {
            return Err(ValidationError::AddressShadowedByCname(new.to_string()));
        }
        let duplicate = same_name
            .iter()
            .any(|record| record.kind() == new.kind() && record.value() == new.value());
        if duplicate {
            return Err(ValidationError::DuplicateAddress(new.to_string()));
        }
    } else {
        if has_address {
            return Err(ValidationError::CnameShadowedByAddress(new.to_string()));
        }
        if has_cname {
            return Err(ValidationError::DuplicateCname(new.to_string()));
        }
        if let Some(target) = new.cname_target() {
            check_for_cycle(new, target, existing)?;
        }
    }

    Ok(())
}

/// Walk the CNAME chain starting at `new.name` through the forward mapping
/// of all existing CNAMEs plus `new`; fail if a node repeats before the
/// chain falls off the mapped set.
fn check_for_cycle(
    new: &Record,
    target: &str,
    existing: &[RecordIntent],
) -> Result<(), ValidationError> {
    let mut forward: HashMap<&str, &str> = HashMap::new();
    for intent in existing {
        if let Some(target) = intent.record.cname_target() {
            let name = intent.record.name();
            if forward.contains_key(name) {
                warn!(name, "duplicate CNAME definitions in registry snapshot, keeping the first");
                continue;
            }
            forward.insert(name, target);
        }
    }
    forward.insert(new.name(), target);

    let mut seen: HashSet<&str> = HashSet::new();
    let mut node = new.name();
    while let Some(next) = forward.get(node) {
        if !seen.insert(node) {
            return Err(ValidationError::CnameCycle(new.to_string()));
        }
        node = next;
    }
    Ok(())
}
