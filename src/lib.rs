//! DUTCHER — race odds calibration, dutch staking and exchange bet tracking.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod error;
pub mod odds;
pub mod calibration;
pub mod strategy;
pub mod exchange;
pub mod engine;
pub mod storage;
