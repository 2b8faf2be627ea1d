//! JSON-RPC layer
//!
//! - `protocol`: outbound envelopes and inbound frame classification
//! - `registry`: id allocation, pending-call table and per-call timers
//! - `gate`: readiness gating and the post-connect migration driver
//! - `client`: the public call facade

pub mod client;
pub mod gate;
pub mod protocol;
pub mod registry;
