//! Hardware collaborator contracts.
//!
//! This module contains the traits the interfuse layer drives (a DAQ card and
//! a photon counter), their error type, and the static hardware configuration.

pub mod config;
pub mod driver;
pub mod types;
