//! Cross-host reconciliation of the local desired set against the shared
//! registry snapshot.
//!
//! Three phases per pass:
//! 1. Stale scan: records this host owns that it no longer desires are
//!    scheduled for removal. Foreign records are never removed here (other
//!    hosts manage their own) but they stay visible for conflict checks.
//! 2. Per-desired conflict decisions, producing eviction sets under the
//!    force-then-age rules.
//! 3. Simulate the post-state and validate each candidate before committing
//!    it to the add list.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::intent::RecordIntent;
use crate::policy::{should_replace_all_existing, should_replace_existing};
use crate::record::RecordKind;
use crate::validator::validate_record;

/// Index over the registry snapshot, keyed per name and family the way
/// phase 2 looks records up. Built once per pass; evictions do not mutate
/// it.
struct ActualIndex<'a> {
    addresses_by_name: HashMap<&'a str, Vec<&'a RecordIntent>>,
    cnames_by_name: HashMap<&'a str, Vec<&'a RecordIntent>>,
}

impl<'a> ActualIndex<'a> {
    fn new() -> Self {
        Self {
            addresses_by_name: HashMap::new(),
            cnames_by_name: HashMap::new(),
        }
    }

    fn insert(&mut self, intent: &'a RecordIntent) {
        let bucket = if intent.record.is_cname() {
            &mut self.cnames_by_name
        } else {
            &mut self.addresses_by_name
        };
        bucket.entry(intent.record.name()).or_default().push(intent);
    }

    fn cnames_at(&self, name: &str) -> &[&'a RecordIntent] {
        self.cnames_by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn addresses_at(&self, name: &str) -> &[&'a RecordIntent] {
        self.addresses_by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Diff `desired` (already intra-host filtered) against `actual` (the
/// registry snapshot) and return `(to_add, to_remove)`.
///
/// `local_hostname` scopes the stale scan: only records owned by this host
/// are ever removed for being undesired. Foreign records leave the set only
/// by losing a conflict to a desired intent.
pub fn reconcile_and_validate(
    desired: &[RecordIntent],
    actual: &[RecordIntent],
    local_hostname: &str,
) -> (Vec<RecordIntent>, Vec<RecordIntent>) {
    debug!(
        desired = desired.len(),
        actual = actual.len(),
        "starting reconciliation pass"
    );

    let desired_keys: HashSet<String> = desired.iter().map(RecordIntent::key).collect();

    // Phase 1: stale scan, plus the phase-2 lookup index over everything
    // that stays in place.
    let mut to_remove: HashMap<String, RecordIntent> = HashMap::new();
    let mut index = ActualIndex::new();
    for record in actual {
        if !desired_keys.contains(&record.key()) && record.hostname == local_hostname {
            info!(record = %record, "removing stale record");
            to_remove.insert(record.record.key(), record.clone());
        } else {
            index.insert(record);
        }
    }

    fn evict_all(set: &[&RecordIntent], evictions: &mut HashMap<String, RecordIntent>) {
        evictions.extend(set.iter().map(|r| (r.record.key(), (*r).clone())));
    }

    // Phase 2 + 3: per-desired decision, simulate, validate.
    let mut to_add: HashMap<String, RecordIntent> = HashMap::new();
    for candidate in desired {
        let mut evictions: HashMap<String, RecordIntent> = HashMap::new();

        let decision = match candidate.record.kind() {
            RecordKind::A | RecordKind::Aaaa => {
                let cnames = index.cnames_at(candidate.record.name());
                if !cnames.is_empty() {
                    // Address vs CNAME: evicting means evicting every CNAME
                    // at the name, so one CNAME per name holds afterwards.
                    if should_replace_all_existing(candidate, cnames) {
                        warn!(
                            local = %candidate.record,
                            remote = %cnames[0].record,
                            "conflict between local address and remote CNAME, evicting remote"
                        );
                        evict_all(cnames, &mut evictions);
                        Decision::Add
                    } else {
                        Decision::Skip
                    }
                } else {
                    let same_kind: Vec<&RecordIntent> = index
                        .addresses_at(candidate.record.name())
                        .iter()
                        .filter(|a| a.record.kind() == candidate.record.kind())
                        .copied()
                        .collect();
                    if same_kind.iter().any(|a| a.same_identity(candidate)) {
                        Decision::AlreadyPresent
                    } else if let Some(&same_value) =
                        same_kind.iter().find(|a| a.record == candidate.record)
                    {
                        if should_replace_existing(candidate, same_value) {
                            warn!(
                                local = %candidate.record,
                                remote = %same_value.record,
                                owner = %same_value.hostname,
                                "conflict between local and remote address record, evicting remote"
                            );
                            evictions.insert(same_value.record.key(), same_value.clone());
                            Decision::Add
                        } else {
                            Decision::Skip
                        }
                    } else {
                        // Differing values at one name coexist (round-robin
                        // address sets); only force-flagged rivals contend
                        // for the whole name.
                        let force_rivals: Vec<&RecordIntent> = same_kind
                            .iter()
                            .filter(|a| a.force)
                            .copied()
                            .collect();
                        if force_rivals.is_empty() {
                            Decision::Add
                        } else if force_rivals
                            .iter()
                            .all(|&a| should_replace_existing(candidate, a))
                        {
                            warn!(
                                local = %candidate.record,
                                rivals = force_rivals.len(),
                                "local address record displaces force records at the same name"
                            );
                            evict_all(&force_rivals, &mut evictions);
                            Decision::Add
                        } else {
                            Decision::Skip
                        }
                    }
                }
            }
            RecordKind::Cname => {
                let addresses = index.addresses_at(candidate.record.name());
                let cnames = index.cnames_at(candidate.record.name());
                if !addresses.is_empty() {
                    if should_replace_all_existing(candidate, addresses) {
                        warn!(
                            local = %candidate.record,
                            "conflict between local CNAME and remote address records, evicting remote"
                        );
                        evict_all(addresses, &mut evictions);
                        Decision::Add
                    } else {
                        Decision::Skip
                    }
                } else if !cnames.is_empty() {
                    if cnames.iter().any(|c| c.same_identity(candidate)) {
                        Decision::AlreadyPresent
                    } else if should_replace_all_existing(candidate, cnames) {
                        warn!(
                            local = %candidate.record,
                            remote = %cnames[0].record,
                            "conflict between local and remote CNAME, evicting remote"
                        );
                        evict_all(cnames, &mut evictions);
                        Decision::Add
                    } else {
                        Decision::Skip
                    }
                } else {
                    Decision::Add
                }
            }
        };

        match decision {
            Decision::AlreadyPresent => continue,
            Decision::Skip => {
                debug!(record = %candidate.record, "remote record wins, skipping local intent");
                continue;
            }
            Decision::Add => {}
        }

        // Phase 3: simulated post-state = actual plus accepted adds, minus
        // everything scheduled for removal and this candidate's evictions.
        let removed_keys: HashSet<&String> =
            to_remove.keys().chain(evictions.keys()).collect();
        let simulated: Vec<RecordIntent> = actual
            .iter()
            .chain(to_add.values())
            .filter(|r| !removed_keys.contains(&r.record.key()))
            .cloned()
            .collect();

        match validate_record(&candidate.record, &simulated) {
            Ok(()) => {
                info!(record = %candidate, "adding record");
                to_add.insert(candidate.record.key(), candidate.clone());
                to_remove.extend(evictions);
            }
            Err(err) => {
                warn!(record = %candidate.record, error = %err, "skipping invalid record");
                crate::metrics::record_validation_rejected();
            }
        }
    }

    (
        to_add.into_values().collect(),
        to_remove.into_values().collect(),
    )
}

enum Decision {
    Add,
    Skip,
    AlreadyPresent,
}
