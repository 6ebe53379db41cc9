use std::time::{SystemTime, UNIX_EPOCH};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A wall clock that never hands out the same millisecond twice.
///
/// Temporary ids are derived from these readings, so two offline writes in
/// the same millisecond still get distinct ids.
pub struct MonotonicClock {
    last_ms: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    /// Generate the next strictly increasing timestamp.
    pub fn tick(&mut self) -> Result<u64, CoreError> {
        let now = physical_now()?;
        let ms = if now > self.last_ms {
            now
        } else {
            self.last_ms + 1
        };
        self.last_ms = ms;
        Ok(ms)
    }

    /// Advance past a timestamp observed elsewhere (e.g. a restored queue).
    pub fn observe(&mut self, ms: u64) {
        if ms > self.last_ms {
            self.last_ms = ms;
        }
    }

    pub fn last(&self) -> u64 {
        self.last_ms
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
