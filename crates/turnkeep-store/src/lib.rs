//! turnkeep-store — the durable event log (L1), session registry (L2), DAG
//! navigator (L3), and fork/rewind engine (L9).

pub mod db;
pub mod fork;
pub mod log;
pub mod navigator;
pub mod registry;

pub use db::Db;
pub use fork::ForkEngine;
pub use log::{EventLog, SearchFilter};
pub use navigator::{BranchPoint, Branches, DagNavigator};
pub use registry::SessionRegistry;
