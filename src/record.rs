//! DNS record value types.
//!
//! A [`Record`] is a validated `(name, kind, value)` triple. Construction is
//! the only place validation happens; any `Record` in circulation satisfies
//! the hostname grammar and the kind-appropriate value grammar.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RecordError;

/// The closed set of record kinds this agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// IPv4 address record.
    A,
    /// IPv6 address record.
    Aaaa,
    /// Canonical-name alias record.
    Cname,
}

impl RecordKind {
    /// Canonical (upper-case) string form, as stored in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
            RecordKind::Cname => "CNAME",
        }
    }

    /// True for the address kinds (`A` and `AAAA`).
    pub fn is_address(&self) -> bool {
        matches!(self, RecordKind::A | RecordKind::Aaaa)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = RecordError;

    /// Case-insensitive; earlier registry revisions stored lower-case kinds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(RecordKind::A),
            "AAAA" => Ok(RecordKind::Aaaa),
            "CNAME" => Ok(RecordKind::Cname),
            other => Err(RecordError::UnsupportedKind(other.to_string())),
        }
    }
}

impl Serialize for RecordKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The typed value carried by a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordData {
    /// IPv4 address for an `A` record.
    A(Ipv4Addr),
    /// IPv6 address for an `AAAA` record.
    Aaaa(Ipv6Addr),
    /// Target hostname for a `CNAME` record.
    Cname(String),
}

/// A validated DNS record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    name: String,
    data: RecordData,
}

impl Record {
    /// Build an `A` record. Fails unless `name` is a valid hostname and
    /// `value` parses as an IPv4 address.
    pub fn a(name: &str, value: &str) -> Result<Self, RecordError> {
        let name = valid_hostname(name, RecordKind::A)?;
        let addr: Ipv4Addr = value
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidIpv4(value.to_string()))?;
        Ok(Self {
            name,
            data: RecordData::A(addr),
        })
    }

    /// Build an `AAAA` record. The value must parse as IPv6 and must not be
    /// an IPv4-mapped address.
    pub fn aaaa(name: &str, value: &str) -> Result<Self, RecordError> {
        let name = valid_hostname(name, RecordKind::Aaaa)?;
        let addr: Ipv6Addr = value
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidIpv6(value.to_string()))?;
        if addr.to_ipv4_mapped().is_some() {
            return Err(RecordError::InvalidIpv6(value.to_string()));
        }
        Ok(Self {
            name,
            data: RecordData::Aaaa(addr),
        })
    }

    /// Build a `CNAME` record. Both `name` and the target must be valid
    /// hostnames.
    pub fn cname(name: &str, target: &str) -> Result<Self, RecordError> {
        let name = valid_hostname(name, RecordKind::Cname)?;
        let target = valid_hostname(target, RecordKind::Cname)?;
        Ok(Self {
            name,
            data: RecordData::Cname(target),
        })
    }

    /// Build a record of the given kind from string parts.
    pub fn new(kind: RecordKind, name: &str, value: &str) -> Result<Self, RecordError> {
        match kind {
            RecordKind::A => Self::a(name, value),
            RecordKind::Aaaa => Self::aaaa(name, value),
            RecordKind::Cname => Self::cname(name, value),
        }
    }

    /// The record's FQDN.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record's kind.
    pub fn kind(&self) -> RecordKind {
        match self.data {
            RecordData::A(_) => RecordKind::A,
            RecordData::Aaaa(_) => RecordKind::Aaaa,
            RecordData::Cname(_) => RecordKind::Cname,
        }
    }

    /// The record's value in string form (IP address or CNAME target).
    pub fn value(&self) -> String {
        match &self.data {
            RecordData::A(addr) => addr.to_string(),
            RecordData::Aaaa(addr) => addr.to_string(),
            RecordData::Cname(target) => target.clone(),
        }
    }

    /// Canonical key string: `name|kind|value`.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.name, self.kind(), self.value())
    }

    /// True for `A` and `AAAA` records.
    pub fn is_address(&self) -> bool {
        self.kind().is_address()
    }

    /// True for `CNAME` records.
    pub fn is_cname(&self) -> bool {
        matches!(self.data, RecordData::Cname(_))
    }

    /// The CNAME target, when this is a CNAME.
    pub fn cname_target(&self) -> Option<&str> {
        match &self.data {
            RecordData::Cname(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -> {}", self.kind(), self.name, self.value())
    }
}

/// Check `s` against the LDH hostname grammar: at most 255 chars total,
/// labels of 1-63 alphanumeric-or-hyphen chars joined by dots, no label
/// starting or ending with a hyphen.
pub fn is_valid_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 255 {
        return false;
    }
    s.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= 63
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-'
    })
}

fn valid_hostname(s: &str, kind: RecordKind) -> Result<String, RecordError> {
    let trimmed = s.trim();
    if is_valid_hostname(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(RecordError::InvalidHostname {
            kind,
            name: s.to_string(),
        })
    }
}
