//! Simulation clock state — the engine's day window and the run guard that
//! serialises clock mutations.

use crate::error::{EngineError, EngineResult};
use crate::types::SimDay;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The day window being replayed. Invariant: start_day <= current_day <= end_day.
/// Persisted by the store; mutated only by clock operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub start_day: SimDay,
    pub end_day: SimDay,
    pub current_day: SimDay,
    pub updated_at: DateTime<Utc>,
}

impl EngineState {
    pub fn new(start_day: SimDay, end_day: SimDay) -> Self {
        Self {
            start_day,
            end_day,
            current_day: start_day,
            updated_at: Utc::now(),
        }
    }

    pub fn at_end(&self) -> bool {
        self.current_day >= self.end_day
    }

    pub fn check_in_window(&self, date: SimDay) -> EngineResult<()> {
        if date < self.start_day || date > self.end_day {
            return Err(EngineError::DateOutOfWindow {
                date,
                start_day: self.start_day,
                end_day: self.end_day,
            });
        }
        Ok(())
    }

    /// Move the clock forward one day. Rejected at the end of the window
    /// with no state mutated.
    pub fn advance(&mut self) -> EngineResult<SimDay> {
        if self.at_end() {
            return Err(EngineError::AtEndOfWindow {
                end_day: self.end_day,
            });
        }
        self.current_day = self.current_day + Duration::days(1);
        self.updated_at = Utc::now();
        Ok(self.current_day)
    }

    /// Jump directly to a day inside the window without running the days in
    /// between.
    pub fn skip_to(&mut self, date: SimDay) -> EngineResult<()> {
        self.check_in_window(date)?;
        self.current_day = date;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Serialises run_current / advance / skip / reset. A second caller arriving
/// while a permit is held gets `ConflictingOperation` instead of interleaved
/// clock state. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    busy: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> EngineResult<RunPermit> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(EngineError::ConflictingOperation);
        }
        Ok(RunPermit {
            busy: Arc::clone(&self.busy),
        })
    }
}

pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(s: &str) -> SimDay {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn advance_walks_to_end_then_rejects() {
        let mut state = EngineState::new(day("2024-03-01"), day("2024-03-03"));
        assert_eq!(state.advance().unwrap(), day("2024-03-02"));
        assert_eq!(state.advance().unwrap(), day("2024-03-03"));
        assert!(matches!(
            state.advance(),
            Err(EngineError::AtEndOfWindow { .. })
        ));
        assert_eq!(state.current_day, day("2024-03-03"));
    }

    #[test]
    fn skip_rejects_out_of_window() {
        let mut state = EngineState::new(day("2024-03-01"), day("2024-03-10"));
        assert!(state.skip_to(day("2024-03-07")).is_ok());
        assert!(matches!(
            state.skip_to(day("2024-03-11")),
            Err(EngineError::DateOutOfWindow { .. })
        ));
        assert_eq!(state.current_day, day("2024-03-07"));
    }

    #[test]
    fn run_guard_rejects_concurrent_acquire() {
        let guard = RunGuard::new();
        let permit = guard.acquire().unwrap();
        assert!(matches!(
            guard.acquire(),
            Err(EngineError::ConflictingOperation)
        ));
        drop(permit);
        assert!(guard.acquire().is_ok());
    }
}
