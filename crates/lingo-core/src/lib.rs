//! # lingo-core
//!
//! Core abstractions shared by every Lingo component.
//!
//! - **Identifiers**: migration, run and job IDs
//! - **Interfaces**: the client surfaces a translation bundle targets
//! - **Environments**: deployment environments and their reconciliation policy
//! - **Storage**: the object storage contract, with in-memory and S3 backends
//! - **Paths**: deterministic object layout for bundles, live content and backups
//! - **Leases**: expiring check-and-set markers in object storage
//!
//! ## Crate Boundary
//!
//! `lingo-core` knows nothing about migration records or jobs. Those live in
//! `lingo-migrate`, which builds on the primitives defined here.
//!
//! ## Example
//!
//! ```rust
//! use lingo_core::prelude::*;
//!
//! let paths = BundlePaths::new(InterfaceOrigin::Mobile);
//! assert_eq!(paths.current(), "migrations/mobile/current.json");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod environment;
pub mod error;
pub mod id;
pub mod interface;
pub mod lease;
pub mod observability;
pub mod paths;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use lingo_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::environment::Environment;
    pub use crate::error::{Error, Result};
    pub use crate::id::{JobId, MigrationId, RunId};
    pub use crate::interface::InterfaceOrigin;
    pub use crate::lease::{Lease, LeaseInfo, LeaseOutcome};
    pub use crate::paths::BundlePaths;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, ObjectStoreBackend, StorageBackend, WritePrecondition,
        WriteResult,
    };
}

pub use environment::Environment;
pub use error::{Error, Result};
pub use id::{JobId, MigrationId, RunId};
pub use interface::InterfaceOrigin;
pub use lease::{Lease, LeaseInfo, LeaseOutcome};
pub use observability::{LogFormat, Redacted, init_logging};
pub use paths::BundlePaths;
pub use storage::{
    MemoryBackend, ObjectMeta, ObjectStoreBackend, StorageBackend, WritePrecondition, WriteResult,
};
