//! Careflow: conversational symptom intake and triage orchestrator.
//!
//! Drives a symptom-reporting chatbot over an asynchronous, at-least-once
//! messaging channel. Each inbound message flows through one pipeline:
//! dedup → session lookup → field extraction → question selection or risk
//! classification → booking transition → exactly one reply (or a deliberate
//! no-op for duplicates and unsupported message types).

pub mod config;
pub mod dedup;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use dedup::InboundDeduplicator;
pub use pipeline::orchestrator::ConversationPipeline;
pub use session::{Session, SessionStore};
