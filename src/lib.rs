//! Cairn: Content-Addressable Backup Engine
//!
//! A backup engine for computed artifact graphs: content-addressed blob
//! storage, a dependency DAG over the artifacts, immutable-by-default
//! snapshots, dependency-ordered restore, and policy-driven retention.

pub mod api;
pub mod cas;
pub mod config;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod logging;
pub mod restore;
pub mod retention;
pub mod snapshot;
pub mod telemetry;
pub mod types;
