//! The per-message processing pipeline: field extraction and merging,
//! question selection, risk classification, booking transitions, and the
//! orchestrator that runs one inbound message through all of them.

pub mod booking;
pub mod oldcarts;
pub mod orchestrator;
pub mod questions;
pub mod summary;
pub mod triage;
