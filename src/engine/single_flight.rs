//! Per-race single-flight guard.
//!
//! At most one allocation cycle may be in flight for a race. A cycle holds
//! a `FlightGuard` for its whole duration; dropping the guard releases the
//! race, including on early return or error.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. `None` if another holder already has it.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_refused() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire("race-1").unwrap();
        assert_eq!(guard.key(), "race-1");
        assert!(flights.try_acquire("race-1").is_none());
        assert!(flights.try_acquire("race-2").is_some());
    }

    #[test]
    fn test_drop_releases() {
        let flights = SingleFlight::new();
        {
            let _guard = flights.try_acquire("race-1").unwrap();
            assert!(flights.is_in_flight("race-1"));
        }
        assert!(!flights.is_in_flight("race-1"));
        assert!(flights.try_acquire("race-1").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let flights = SingleFlight::new();
        let other = flights.clone();
        let _guard = flights.try_acquire("race-9").unwrap();
        assert!(other.try_acquire("race-9").is_none());
    }
}
