//! End-to-end test support for the agenr workspace
//!
//! The harness owns throwaway databases; the mocks stand in for the three
//! external oracles (embedding provider, supersession judge, extraction
//! model) so every scenario runs deterministic and offline.

pub mod harness;
pub mod mocks;
