//! Core types for ruleops.
//!
//! - **Errors**: the shared [`Error`] type and [`ResultExt`] combinators
//! - **Resources**: the typed cluster records a snapshot is made of
//! - **Snapshots**: the point-in-time collection handed to the rule engine

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod resource;
pub mod result;
pub mod snapshot;

pub use error::Error;
pub use resource::{
    ClaimPhase, ConfigMap, ContainerStatus, Deployment, ObjectMeta, PersistentVolumeClaim, Pod,
    PodPhase, ResourceKind, ResourceRecord, ResourceRef, ResourceScope, Service, ServicePort,
    ServiceType, StatefulSet,
};
pub use result::{Result, ResultExt};
pub use snapshot::{Snapshot, SnapshotBuilder};
