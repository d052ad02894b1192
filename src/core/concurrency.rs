//! Per-user concurrent session accounting.
//!
//! Shared across all sessions; entries disappear as soon as the count hits
//! zero so the map only ever holds users with live sessions.

use dashmap::DashMap;

use crate::errors::SessionError;

pub struct UserConcurrency {
    counts: DashMap<String, usize>,
    max_per_user: usize,
}

impl UserConcurrency {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            counts: DashMap::new(),
            max_per_user,
        }
    }

    /// Reserve a session slot for the user, failing when the cap is reached.
    pub fn try_acquire(&self, user_id: &str) -> Result<(), SessionError> {
        let mut entry = self.counts.entry(user_id.to_string()).or_insert(0);
        if *entry >= self.max_per_user {
            return Err(SessionError::RateLimit(self.max_per_user));
        }
        *entry += 1;
        Ok(())
    }

    /// Release a slot; removes the entry once the user has no open sessions.
    pub fn release(&self, user_id: &str) {
        let remove = match self.counts.get_mut(user_id) {
            Some(mut entry) => {
                *entry = entry.saturating_sub(1);
                *entry == 0
            }
            None => false,
        };
        if remove {
            self.counts.remove_if(user_id, |_, count| *count == 0);
        }
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).map(|e| *e).unwrap_or(0)
    }
}
