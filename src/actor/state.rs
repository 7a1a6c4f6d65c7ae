// actor/state.rs - Agent Lifecycle State

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Agent lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Allocated, not yet registered
    Created,
    /// Registered and accepting mail
    Active,
    /// Running the handler for one message
    Processing,
    /// Terminal; new mail is rejected
    Stopped,
}

/// Shared lifecycle cell for one agent.
///
/// The actor drives `Active <-> Processing`; the manager drives the
/// transitions into `Active` and `Stopped`. A stop that lands while the
/// handler runs is never overwritten when the handler returns.
#[derive(Debug)]
pub struct AgentCell {
    state: Mutex<AgentState>,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    created_at: Instant,
}

impl AgentCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::Created),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == AgentState::Stopped
    }

    /// Created -> Active
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == AgentState::Created {
            *state = AgentState::Active;
            true
        } else {
            false
        }
    }

    /// Active -> Processing. Returns false when the message must be dropped.
    pub fn begin_processing(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            AgentState::Active => {
                *state = AgentState::Processing;
                true
            }
            _ => false,
        }
    }

    /// Processing -> Active, unless a stop arrived meanwhile
    pub fn finish_processing(&self, success: bool) {
        {
            let mut state = self.state.lock();
            if *state == AgentState::Processing {
                *state = AgentState::Active;
            }
        }

        self.processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Any state -> Stopped. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if *state == AgentState::Stopped {
            false
        } else {
            *state = AgentState::Stopped;
            true
        }
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn handler_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

impl Default for AgentCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let cell = AgentCell::new();
        assert_eq!(cell.state(), AgentState::Created);
        assert!(!cell.begin_processing());

        assert!(cell.activate());
        assert!(cell.begin_processing());
        assert_eq!(cell.state(), AgentState::Processing);

        cell.finish_processing(false);
        assert_eq!(cell.state(), AgentState::Active);
        assert_eq!(cell.messages_processed(), 1);
        assert_eq!(cell.handler_failures(), 1);
    }

    #[test]
    fn test_stop_during_processing_sticks() {
        let cell = AgentCell::new();
        cell.activate();
        assert!(cell.begin_processing());

        assert!(cell.stop());
        cell.finish_processing(true);

        assert_eq!(cell.state(), AgentState::Stopped);
        assert!(!cell.begin_processing());
        assert!(!cell.stop());
    }
}
