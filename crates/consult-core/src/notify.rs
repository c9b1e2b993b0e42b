//! Client-side notification suppression
//!
//! A presentation layer shows a banner for every active session. Once the
//! user dismisses one it stays hidden until the entry expires; the set is
//! never cleared just because it was reloaded. The engine itself never
//! reads this state.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::ActiveSession;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DismissedSet {
    ttl_secs: i64,
    /// booking id -> dismissed at
    entries: HashMap<String, DateTime<Utc>>,
}

impl DismissedSet {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_secs: ttl.num_seconds(),
            entries: HashMap::new(),
        }
    }

    /// Empty set using the configured dismissal lifetime
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.dismissed_ttl())
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs)
    }

    pub fn dismiss(&mut self, booking_id: impl Into<String>, now: DateTime<Utc>) {
        self.entries.insert(booking_id.into(), now);
    }

    pub fn is_dismissed(&self, booking_id: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(booking_id)
            .is_some_and(|at| now < *at + self.ttl())
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl();
        let before = self.entries.len();
        self.entries.retain(|_, at| now < *at + ttl);
        before - self.entries.len()
    }

    /// Sessions the user has not dismissed
    pub fn filter_pending(&self, sessions: Vec<ActiveSession>, now: DateTime<Utc>) -> Vec<ActiveSession> {
        sessions
            .into_iter()
            .filter(|s| !self.is_dismissed(&s.booking.id, now))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
