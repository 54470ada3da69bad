//! Domain types and pure algorithms for roster synchronization, period
//! replication and document data. Nothing in this crate touches storage.

pub mod money;
pub mod reconcile;
pub mod replicate;
pub mod roster_csv;
pub mod types;
