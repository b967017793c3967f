//! skydns-sync - per-host synchronization of Docker containers into a
//! SkyDNS/CoreDNS etcd registry.
//!
//! This crate runs one agent per Docker host. Containers declare DNS
//! records through labels; the agent keeps the shared registry converged
//! with the set of records declared by the containers running here, while
//! respecting records owned by other hosts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         skydns-sync                            │
//! │                                                                │
//! │  ┌──────────────┐   labels   ┌──────────────┐                  │
//! │  │ Docker event │──────────▶ │ Local state  │                  │
//! │  │ source       │ translator │ (per ctr)    │                  │
//! │  └──────────────┘            └──────┬───────┘                  │
//! │                                     │ desired snapshot         │
//! │                                     ▼                          │
//! │  poll tick ──▶ intra-host filter ──▶ global reconciler         │
//! │                                     │ add / remove             │
//! │                                     ▼                          │
//! │                          ┌──────────────────┐                  │
//! │                          │ etcd registry    │◀── __global__    │
//! │                          │ (SkyDNS layout)  │    lock          │
//! │                          └──────────────────┘                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record declaration
//!
//! ```text
//! labels:
//!   coredns.enabled: "true"
//!   coredns.A.name: "web.example.com"
//!   coredns.A.value: "10.0.0.1"          # defaults to app.host_ipv4
//!   coredns.CNAME.api.name: "api.example.com"
//!   coredns.CNAME.api.value: "web.example.com"
//! ```
//!
//! Conflicts (within this host or across the fleet) resolve by `force`
//! first, then container age; equal ages never displace.

#![warn(missing_docs)]

pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod filter;
pub mod intent;
pub mod labels;
pub mod metrics;
pub mod policy;
pub mod reconciler;
pub mod record;
pub mod registry;
pub mod state;
pub mod telemetry;
pub mod validator;
pub mod wire;

// Re-export main types
pub use config::{AppConfig, Config, EtcdConfig, LogConfig};
pub use docker::{ContainerEvent, DockerEventSource, EventSource, EventType};
pub use engine::SyncEngine;
pub use error::{RecordError, SyncError, ValidationError};
pub use intent::RecordIntent;
pub use record::{Record, RecordKind};
pub use registry::{EtcdRegistry, Registry};
pub use state::StateTracker;
