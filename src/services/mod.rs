//! Services layered over the limiter, cache and backend.
//!
//! ARCHITECTURE
//! ============
//! The orchestrator owns the per-call state machine; the sweep task keeps
//! the shared stores bounded in the background.

pub mod orchestrator;
pub mod sweep;
