//! Fixed-window rate limiter for password reset requests.
//!
//! Keys are SHA-256 digests of the user id, so plaintext ids are never held. One request per
//! key is allowed per window; the window starts at the first accepted request and the entry is
//! dropped once it ends.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct FixedWindowLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, Instant>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `user_id`; `false` when one already landed in the current window.
    pub fn try_acquire(&self, user_id: &str) -> bool {
        self.try_acquire_at(user_id, Instant::now())
    }

    fn try_acquire_at(&self, user_id: &str, now: Instant) -> bool {
        let key = hex::encode(Sha256::digest(user_id.as_bytes()));
        let mut windows = self.lock();
        windows.retain(|_, started| now.duration_since(*started) < self.window);

        if windows.contains_key(&key) {
            return false;
        }
        windows.insert(key, now);
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // Entries are plain timestamps; a panic mid-update leaves nothing inconsistent.
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock().len()
    }
}
