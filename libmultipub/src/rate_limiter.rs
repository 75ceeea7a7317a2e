//! Per-platform posting budget
//!
//! Counts claims per platform per clock hour. A job whose platform is over budget
//! is deferred by the scheduler, never failed.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::PlatformKind;

pub struct RateLimiter {
    /// Posts per hour; platforms without an entry are unlimited
    limits: HashMap<PlatformKind, u32>,
    /// Claims counted per (platform, hour start)
    windows: Mutex<HashMap<(PlatformKind, i64), u32>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<PlatformKind, u32>) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(HashMap::new())
    }

    /// Spend one unit of `platform`'s budget for the hour containing `now`
    ///
    /// Returns false, spending nothing, when the hour's budget is used up.
    pub fn check_and_record(&self, platform: PlatformKind, now: i64) -> bool {
        let Some(&limit) = self.limits.get(&platform) else {
            return true;
        };
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let spent = windows.entry((platform, hour_start(now))).or_insert(0);
        if *spent >= limit {
            return false;
        }
        *spent += 1;
        true
    }

    /// Forget hours that ended before the hour containing `cutoff`
    pub fn cleanup_old_windows(&self, cutoff: i64) {
        let oldest_kept = hour_start(cutoff);
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(_, start), _| *start >= oldest_kept);
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn hour_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(3600) * 3600
}
