//! Error types for skydns-sync.

use thiserror::Error;

use crate::record::RecordKind;

/// Errors that can occur while syncing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// etcd client error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// Docker client error
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A registry RPC exceeded the local deadline
    #[error("registry RPC timed out")]
    RpcTimeout,

    /// Failed to acquire a distributed lock within `lock_timeout`
    #[error("failed to acquire lock on {key}")]
    LockTimeout {
        /// The logical lock key that could not be acquired.
        key: String,
    },

    /// A proposed record was rejected by validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The operation was cancelled by shutdown
    #[error("operation cancelled")]
    Cancelled,
}

/// A record failed construction-time validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The name (or CNAME target) does not satisfy the hostname grammar.
    #[error("invalid hostname for {kind} record: {name:?}")]
    InvalidHostname {
        /// Kind of the record being constructed.
        kind: RecordKind,
        /// The offending hostname.
        name: String,
    },

    /// The value does not parse as an IPv4 address.
    #[error("invalid IPv4 address: {0:?}")]
    InvalidIpv4(String),

    /// The value does not parse as IPv6, or is an IPv4-mapped address.
    #[error("invalid IPv6 address: {0:?}")]
    InvalidIpv6(String),

    /// The kind token is not one of A, AAAA, CNAME.
    #[error("unsupported record kind {0:?}")]
    UnsupportedKind(String),
}

/// A proposed record conflicts with the simulated registry post-state.
///
/// Each variant's message carries the rendered offending record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An address record cannot join a name that has a CNAME.
    #[error("{0} - cannot add an address record when a CNAME exists with the same name")]
    AddressShadowedByCname(String),

    /// A CNAME cannot join a name that has address records.
    #[error("{0} - cannot add a CNAME when an address record exists with the same name")]
    CnameShadowedByAddress(String),

    /// At most one CNAME may exist per name.
    #[error("{0} - multiple CNAME records with the same name are not allowed")]
    DuplicateCname(String),

    /// Address records at one name must have distinct values.
    #[error("{0} - an address record with the same name and value already exists")]
    DuplicateAddress(String),

    /// Adding the CNAME would close a resolution cycle.
    #[error("{0} - CNAME resolution cycle detected")]
    CnameCycle(String),
}
