//! Shared builders and assertions for integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use skydns_sync::config::{AppConfig, RecordTypeToggle, RecordTypesConfig};
use skydns_sync::docker::{ContainerEvent, EventType};
use skydns_sync::labels::build_record_intents;
use skydns_sync::{Record, RecordIntent};

/// Host identity used across the scenario tests.
pub const LOCAL_HOST: &str = "h1";

/// Translator configuration with every record kind enabled.
pub fn test_app_config() -> AppConfig {
    AppConfig {
        record_types: RecordTypesConfig {
            a: RecordTypeToggle { enabled: true },
            aaaa: RecordTypeToggle { enabled: true },
            cname: RecordTypeToggle { enabled: true },
        },
        docker_label_prefix: "coredns".to_string(),
        host_ipv4: Some("192.0.2.10".parse().unwrap()),
        host_ipv6: Some("fd00::10".parse().unwrap()),
        hostname: LOCAL_HOST.to_string(),
        poll_interval: 5,
    }
}

/// Build a container start event with the given labels.
pub fn container_event(
    id: &str,
    name: &str,
    created: i64,
    labels: &[(&str, &str)],
) -> ContainerEvent {
    ContainerEvent {
        id: id.to_string(),
        name: name.to_string(),
        created: Utc.timestamp_opt(created, 0).unwrap(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        event_type: EventType::Start,
    }
}

/// Run the label translator with the shared test configuration.
pub fn translate(event: &ContainerEvent) -> Vec<RecordIntent> {
    build_record_intents(event, &test_app_config())
}

/// Build a record intent directly.
pub fn intent(
    host: &str,
    container_id: &str,
    created: i64,
    force: bool,
    record: Record,
) -> RecordIntent {
    RecordIntent {
        container_id: container_id.to_string(),
        container_name: format!("ctr-{container_id}"),
        created: Utc.timestamp_opt(created, 0).unwrap(),
        hostname: host.to_string(),
        force,
        record,
    }
}

/// Apply a reconciliation result to a registry snapshot.
pub fn apply(
    actual: &[RecordIntent],
    to_add: &[RecordIntent],
    to_remove: &[RecordIntent],
) -> Vec<RecordIntent> {
    let removed: HashSet<String> = to_remove.iter().map(|r| r.record.key()).collect();
    actual
        .iter()
        .filter(|r| !removed.contains(&r.record.key()))
        .chain(to_add.iter())
        .cloned()
        .collect()
}

/// Assert no name holds both a CNAME and an address record.
pub fn assert_no_cname_address_coexistence(records: &[RecordIntent]) {
    let cname_names: HashSet<&str> = records
        .iter()
        .filter(|r| r.record.is_cname())
        .map(|r| r.record.name())
        .collect();
    for record in records.iter().filter(|r| r.record.is_address()) {
        assert!(
            !cname_names.contains(record.record.name()),
            "{} holds both a CNAME and an address record",
            record.record.name()
        );
    }
}

/// Assert the CNAME graph over the given records has no cycles.
pub fn assert_cname_graph_acyclic(records: &[RecordIntent]) {
    let forward: HashMap<&str, &str> = records
        .iter()
        .filter_map(|r| r.record.cname_target().map(|t| (r.record.name(), t)))
        .collect();
    for start in forward.keys() {
        let mut seen = HashSet::new();
        let mut node = *start;
        while let Some(next) = forward.get(node) {
            assert!(seen.insert(node), "CNAME cycle through {node}");
            node = next;
        }
    }
}
