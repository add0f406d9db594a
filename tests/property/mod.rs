//! Property-based tests for determinism and ordering guarantees

mod determinism;
