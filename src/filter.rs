//! Intra-host conflict resolution over the local desired set.
//!
//! Containers on one host can collide with each other before the registry is
//! ever consulted: two containers declaring the same name, or one declaring
//! both an address and a CNAME. This pass reduces the raw translator output
//! to a conflict-free desired set.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::intent::RecordIntent;
use crate::policy::{should_replace_all_existing, should_replace_existing};

/// Filter the raw desired intents down to a conflict-free set.
///
/// Pass 1 dedups per `(name, kind, value)`, keeping at most one CNAME per
/// name. Pass 2 decides, per name, between the surviving CNAME and the
/// surviving address records.
pub fn filter_record_intents(records: Vec<RecordIntent>) -> Vec<RecordIntent> {
    // Pass 1. Addresses keyed by the full record key; CNAMEs keyed by name
    // so a name can hold at most one.
    let mut addresses: HashMap<String, RecordIntent> = HashMap::new();
    let mut cnames: HashMap<String, RecordIntent> = HashMap::new();
    let mut names: BTreeSet<String> = BTreeSet::new();

    for intent in records {
        names.insert(intent.record.name().to_string());
        if intent.record.is_cname() {
            match cnames.get_mut(intent.record.name()) {
                Some(existing) => {
                    if should_replace_existing(&intent, existing) {
                        *existing = intent;
                    }
                }
                None => {
                    cnames.insert(intent.record.name().to_string(), intent);
                }
            }
        } else {
            match addresses.get_mut(&intent.record.key()) {
                Some(existing) => {
                    if should_replace_existing(&intent, existing) {
                        *existing = intent;
                    }
                }
                None => {
                    addresses.insert(intent.record.key(), intent);
                }
            }
        }
    }

    // Pass 2. Per name: CNAME alone or addresses alone survive as-is; both
    // present goes to the replace-all predicate.
    let mut reconciled = Vec::with_capacity(addresses.len() + cnames.len());
    for name in names {
        let cname = cnames.remove(&name);
        let addrs: Vec<RecordIntent> = addresses
            .iter()
            .filter(|(_, intent)| intent.record.name() == name)
            .map(|(_, intent)| intent.clone())
            .collect();

        match (cname, addrs.is_empty()) {
            (Some(cname), true) => reconciled.push(cname),
            (None, false) => reconciled.extend(addrs),
            (Some(cname), false) => {
                let addr_refs: Vec<&RecordIntent> = addrs.iter().collect();
                if should_replace_all_existing(&cname, &addr_refs) {
                    warn!(
                        name = %name,
                        cname = %cname.record,
                        "local CNAME displaces address records declared for the same name"
                    );
                    reconciled.push(cname);
                } else {
                    warn!(
                        name = %name,
                        cname = %cname.record,
                        "local address records displace CNAME declared for the same name"
                    );
                    reconciled.extend(addrs);
                }
            }
            (None, true) => {
                warn!(name = %name, "no surviving record intents for name");
            }
        }
    }

    reconciled
}
