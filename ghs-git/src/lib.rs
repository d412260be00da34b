//! The contract the bitmap maintenance core expects from a Git repository
//! implementation, a real shell-out adapter, and the small amount of config
//! and time-expression parsing the contract needs to be self-sufficient.
//!
//! The actual object database, ref database, and bitmap-aware pack writer
//! are out of scope here; they belong to the external Git implementation
//! this crate only describes an interface to.

pub mod config;
pub mod contract;
pub mod shell;
pub mod time_expr;

// Exposed unconditionally (not `#[cfg(test)]`) so downstream crates can use
// it in their own test suites, the way `pbs-datastore` exposes its test
// doubles to dependents.
pub mod test_support;

pub use contract::{
    ConfigReader, GitRepository, Maintenance, ObjectId, PackWriteOutcome, PackWriteRequest,
    PackWriter, RefDatabase, RefEntry, ReflogReader, RepositoryLayout, WorkingTreeIndex,
};
pub use shell::ShellGit;
pub use test_support::FakeGit;
