//! Per-user conversation state and its store.
//!
//! `SessionStore` only arbitrates storage: `get_or_create` is safe under
//! concurrent calls for distinct ids. Ordering for the *same* id is the
//! caller's job: the pipeline holds the returned session mutex across the
//! whole unit of work, so two deliveries for one user can never interleave
//! their mutation of the same session (double field-merge, double stage
//! transition, double dedup write).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::models::{BookingData, ChatEntry, DocumentFindings, RiskAssessment, Stage};
use crate::pipeline::oldcarts::{FieldKey, OldcartsFields};

/// Sliding-window bound on chat history; oldest entries drop first.
const HISTORY_LIMIT: usize = 20;

/// Mutable conversation state for one user. Lives for the process lifetime;
/// never explicitly destroyed.
#[derive(Debug, Clone)]
pub struct Session {
    pub history: Vec<ChatEntry>,
    pub turn_count: u32,
    pub stage: Stage,
    pub fields: OldcartsFields,
    /// Fields already asked about in the current collection pass.
    /// Reset when entering risk classification. Never exceeds 4 entries
    /// before the pass is forced to end.
    pub asked_keys: Vec<FieldKey>,
    /// The field awaiting an answer, if any.
    pub last_asked_key: Option<FieldKey>,
    pub risk_assessment: Option<RiskAssessment>,
    pub booking: BookingData,
    pub attachments: Vec<DocumentFindings>,
    pub booking_confirmed: bool,
    /// Session-scoped dedup: the last processed message id.
    pub last_message_id: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            turn_count: 0,
            stage: Stage::Intake,
            fields: OldcartsFields::default(),
            asked_keys: Vec::new(),
            last_asked_key: None,
            risk_assessment: None,
            booking: BookingData::default(),
            attachments: Vec::new(),
            booking_confirmed: false,
            last_message_id: None,
        }
    }

    /// Append an entry, dropping the oldest once past the window bound.
    pub fn push_history(&mut self, entry: ChatEntry) {
        self.history.push(entry);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Record an asked field: ordered, distinct.
    pub fn record_asked(&mut self, key: FieldKey) {
        if !self.asked_keys.contains(&key) {
            self.asked_keys.push(key);
        }
        self.last_asked_key = Some(key);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory session store, keyed by user id. Lazily creates sessions on
/// first contact. The map lock is held only for lookup/insert; the returned
/// per-session `tokio::sync::Mutex` serializes processing for that user.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, user_id: &str) -> Arc<tokio::sync::Mutex<Session>> {
        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Session::new())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
