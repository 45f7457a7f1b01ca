//! Snapshot records, identity keys and lifecycle events.

pub mod event;
pub mod identity;
pub mod outage;
pub mod time;

pub use event::{EventKind, LifecycleEvent, OutageId, TrackedOutage};
pub use identity::{IdentityKey, ParseIdentityKeyError};
pub use outage::{CustomersAffected, OutageDesc, OutageGeom, RawOutage, decode_snapshot};
