//! Change-tracking-based SQL Server replication engine.
//!
//! Replicates row-level changes from one source database to one or
//! more destination databases using SQL Server's native change
//! tracking, extracting an incremental delta per destination baseline
//! and applying it transactionally alongside the destination's
//! recorded version.
//!
//! # Architecture
//!
//! - [`gateway`] — thin wrapper over one open connection to a SQL
//!   Server database
//! - [`discovery`] — finds change-tracking-enabled tables and their
//!   key/other columns
//! - [`version`] — reads or bootstraps a destination's `SyncInfo` row
//! - [`extract`] — computes the source's current version and streams
//!   back the changes since a baseline
//! - [`apply`] — orders and executes DML on a destination, advancing
//!   `SyncInfo` atomically
//! - [`orchestrator`] — drives the above per configured replication
//!   set

pub mod apply;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod version;
