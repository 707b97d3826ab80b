//! Per-user cooldown between permitted requests.
//!
//! One entry per user who was ever admitted; entries are overwritten on every
//! permit and never evicted, so the map grows with the number of distinct users.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

use crate::domain::UserId;

/// Proof that a request passed the cooldown check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permit {
    pub user_id: UserId,
    pub granted_at: Instant,
}

/// Denial carrying the time left until the next request is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wait {
    pub remaining: Duration,
}

impl Wait {
    /// Remaining seconds rounded to one decimal, for user-facing text.
    pub fn remaining_display(&self) -> String {
        format!("{:.1}", self.remaining.as_secs_f64())
    }
}

#[derive(Debug, Default)]
pub struct CooldownLimiter {
    last_request: Mutex<HashMap<UserId, Instant>>,
}

impl CooldownLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, user_id: UserId, cooldown: Duration) -> Result<Permit, Wait> {
        self.try_acquire_at(user_id, cooldown, Instant::now())
    }

    /// Check-and-set under a single lock: two callers for the same user can
    /// never both observe an expired cooldown.
    pub fn try_acquire_at(
        &self,
        user_id: UserId,
        cooldown: Duration,
        now: Instant,
    ) -> Result<Permit, Wait> {
        let mut map = self.lock();

        if let Some(last) = map.get(&user_id) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                return Err(Wait {
                    remaining: cooldown - elapsed,
                });
            }
        }

        map.insert(user_id, now);
        Ok(Permit {
            user_id,
            granted_at: now,
        })
    }

    pub fn last_request_at(&self, user_id: UserId) -> Option<Instant> {
        self.lock().get(&user_id).copied()
    }

    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Instant>> {
        // The critical section cannot panic halfway through an update, so a
        // poisoned map is still consistent.
        self.last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
