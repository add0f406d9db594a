//! Integration tests for the Cairn backup engine

mod engine_scenarios;
mod snapshot_retention;
mod store_lifecycle;
