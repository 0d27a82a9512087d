//! Integration tests for the qscan logic.
//!
//! These tests run the scan loop against the simulated backend, covering
//! configuration loading, whole scans with faults, and history persistence
//! across controller instances.

mod integration;
