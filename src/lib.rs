//! Rate-limited, cached gateway to an external analysis CLI.
//!
//! ARCHITECTURE
//! ============
//! `rate_limit` and `cache` are standalone stores. `backend` spawns the
//! analysis tool and parses what it prints. `services::orchestrator` ties
//! them together per call, and `state` wires one of each for a process.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod services;
pub mod state;
