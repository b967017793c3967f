//! Translation of container labels into record intents.
//!
//! Label grammar, under the configured prefix `P` (kind tokens are
//! case-insensitive):
//!
//! ```text
//! P.enabled = "true"                      gate; absent/false -> no intents
//! P.force = "true"|"false"                container-level force default
//! P.<KIND>.name / .value / .force         base record of KIND
//! P.<KIND>.<ALIAS>.name / .value / .force additional records per ALIAS
//! ```
//!
//! Translation never fails: unparseable or incomplete entries are skipped
//! with a warning and the rest of the container's labels still apply.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::docker::ContainerEvent;
use crate::intent::RecordIntent;
use crate::record::{Record, RecordKind};

/// One `(kind, alias)` label aggregate. `force` is tri-state: `None` means
/// the record carries no override and the container default applies.
#[derive(Debug, Default)]
struct LabelAggregate {
    name: Option<String>,
    value: Option<String>,
    force: Option<bool>,
}

fn label_is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Parse the container's labels into record intents.
pub fn build_record_intents(event: &ContainerEvent, cfg: &AppConfig) -> Vec<RecordIntent> {
    let labels = &event.labels;
    let prefix = cfg.docker_label_prefix.as_str();

    let enabled = labels
        .get(&format!("{prefix}.enabled"))
        .is_some_and(|v| label_is_true(v));
    if !enabled {
        debug!(container = %event.name, "record generation not enabled via labels");
        return Vec::new();
    }

    let container_force = labels
        .get(&format!("{prefix}.force"))
        .is_some_and(|v| label_is_true(v));

    // Aggregate record labels by (kind, alias); the base form uses an
    // empty alias.
    let mut aggregates: HashMap<(RecordKind, String), LabelAggregate> = HashMap::new();
    for (label, value) in labels {
        let Some(rest) = label.strip_prefix(prefix).and_then(|r| r.strip_prefix('.')) else {
            continue;
        };
        let parts: Vec<&str> = rest.split('.').collect();
        let (kind_token, alias, field) = match parts.as_slice() {
            [kind, field] => (*kind, "", *field),
            [kind, alias, field] => (*kind, *alias, *field),
            _ => {
                debug!(label = %label, "skipping malformed record label");
                continue;
            }
        };

        let kind: RecordKind = match kind_token.parse() {
            Ok(kind) => kind,
            Err(_) => {
                // `enabled` / `force` land here for the two-part form.
                if !matches!(kind_token, "enabled" | "force") {
                    warn!(label = %label, "skipping label with unsupported record kind");
                }
                continue;
            }
        };
        if !matches!(field, "name" | "value" | "force") {
            debug!(label = %label, "skipping record label with unknown field");
            continue;
        }

        let aggregate = aggregates.entry((kind, alias.to_string())).or_default();
        match field {
            "name" => aggregate.name = Some(value.clone()),
            "value" => aggregate.value = Some(value.clone()),
            _ => aggregate.force = Some(label_is_true(value)),
        }
    }

    let mut intents = Vec::with_capacity(aggregates.len());
    for ((kind, alias), aggregate) in aggregates {
        if !cfg.kind_enabled(kind) {
            debug!(kind = %kind, alias = %alias, "record kind disabled by configuration, skipping");
            continue;
        }

        let name = match aggregate.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!(
                    kind = %kind,
                    alias = %alias,
                    container = %event.name,
                    "record label group has no name, skipping"
                );
                continue;
            }
        };

        let value = match aggregate.value {
            Some(value) => value,
            None => match kind {
                RecordKind::A => match cfg.host_ipv4 {
                    Some(ip) => {
                        warn!(
                            name = %name,
                            "A record has no value label, using configured host IPv4 {ip}"
                        );
                        ip.to_string()
                    }
                    None => {
                        warn!(name = %name, "A record has no value label and no host IPv4 is configured, skipping");
                        continue;
                    }
                },
                RecordKind::Aaaa => match cfg.host_ipv6 {
                    Some(ip) => {
                        warn!(
                            name = %name,
                            "AAAA record has no value label, using configured host IPv6 {ip}"
                        );
                        ip.to_string()
                    }
                    None => {
                        warn!(name = %name, "AAAA record has no value label and no host IPv6 is configured, skipping");
                        continue;
                    }
                },
                RecordKind::Cname => {
                    warn!(name = %name, "CNAME record has no value label, skipping");
                    continue;
                }
            },
        };

        let record = match Record::new(kind, &name, &value) {
            Ok(record) => record,
            Err(err) => {
                warn!(name = %name, value = %value, error = %err, "invalid record from labels, skipping");
                continue;
            }
        };

        intents.push(RecordIntent {
            container_id: event.id.clone(),
            container_name: event.name.clone(),
            created: event.created,
            hostname: cfg.hostname.clone(),
            force: aggregate.force.unwrap_or(container_force),
            record,
        });
    }

    intents
}
