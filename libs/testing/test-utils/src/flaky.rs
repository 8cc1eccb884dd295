use std::collections::HashMap;
use std::sync::Mutex;

use tonic::Status;

/// Simulates a flaky endpoint: every key fails with `failed_precondition`
/// for its first N attempts, then succeeds, reporting how many failures it
/// took to recover.
///
/// The counters live here, in the test collaborator, not in any production
/// code path; `reset` / `reset_all` restore a key (or everything) to the
/// never-called state.
pub struct FlakyRegistry {
    failures_before_success: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FlakyRegistry {
    pub fn new(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one invocation for `key`. Fails while the key has been seen
    /// fewer than `failures_before_success` times; afterwards returns the
    /// number of failures it took.
    pub fn attempt(&self, key: &str) -> Result<u32, Status> {
        let mut attempts = self.attempts.lock().unwrap();
        let seen = attempts.entry(key.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= self.failures_before_success {
            Err(Status::failed_precondition(format!(
                "{key} unavailable on attempt {seen}"
            )))
        } else {
            Ok(self.failures_before_success)
        }
    }

    /// Total invocations recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        *self.attempts.lock().unwrap().get(key).unwrap_or(&0)
    }

    pub fn reset(&self, key: &str) {
        self.attempts.lock().unwrap().remove(key);
    }

    pub fn reset_all(&self) {
        self.attempts.lock().unwrap().clear();
    }
}
