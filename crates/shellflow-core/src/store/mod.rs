//! Persistent storage behind a single guarded redb handle.
//!
//! # Table design
//!
//! ```text
//! workflows : &str (workflow id)                     -> JSON Workflow
//! vault     : &str (scope \x1f workflow_id \x1f key) -> JSON VaultEntry
//! runs      : u64  (run id, monotonic)               -> JSON Run
//! meta      : &str                                   -> u64 counters
//! ```
//!
//! All access goes through [`StoreGateway`]. The typed sub-stores
//! ([`WorkflowStore`], [`VaultStore`], [`RunStore`]) are thin views that
//! submit closures to the gateway.

mod gateway;
pub mod legacy;
mod runs;
mod vault;
mod workflows;

use redb::TableDefinition;

pub use gateway::{StoreGateway, StoreOptions};
pub use runs::{Run, RunStore};
pub use vault::{VaultEntry, VaultStore};
pub use workflows::WorkflowStore;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub(crate) const WORKFLOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");
pub(crate) const VAULT: TableDefinition<&str, &[u8]> = TableDefinition::new("vault");
pub(crate) const RUNS: TableDefinition<u64, &[u8]> = TableDefinition::new("runs");
pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
