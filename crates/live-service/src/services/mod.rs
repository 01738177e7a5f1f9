//! Service layer for the live service.
//!
//! # Components
//!
//! - `lifecycle` - session state machine: create, join, leave, end, invites
//! - `directory` - read paths with participant rosters
//! - `policy` - host and visibility predicates
//! - `source_catalog` - existence and access check for a session's source

pub mod directory;
pub mod lifecycle;
pub mod policy;
pub mod source_catalog;

pub use directory::SessionDirectory;
pub use lifecycle::{InviteTtlPolicy, LiveSessionService};
pub use source_catalog::{PgSourceCatalog, SourceCatalog};
// Test double exposed for integration tests and the test harness.
pub use source_catalog::mock::StaticSourceCatalog;
