//! Per-session turn serialization.
//!
//! Turns within one session run strictly one at a time; turns across sessions
//! never block each other. Each session gets a slot with a bounded wait queue:
//! a turn arriving past the depth limit, or waiting longer than the queue
//! timeout, is rejected with a busy signal instead of piling up.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("session {session_id} is busy, try again shortly")]
    Busy { session_id: String },
}

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Current holder plus queued waiters.
    occupancy: AtomicUsize,
    last_used: Mutex<Instant>,
}

/// Serializes turns per session id.
pub struct SessionGate {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    queue_depth: usize,
    queue_timeout: Duration,
}

/// Held for the duration of one turn; releases the session on drop.
pub struct SessionGuard {
    _lock: tokio::sync::OwnedMutexGuard<()>,
    slot: Arc<Slot>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.slot.occupancy.fetch_sub(1, Ordering::SeqCst);
        *self.slot.last_used.lock() = Instant::now();
    }
}

impl SessionGate {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            queue_depth: config.queue_depth,
            queue_timeout: Duration::from_secs(config.queue_timeout_secs),
        }
    }

    /// Wait for exclusive access to a session, up to the queue limits.
    pub async fn acquire(&self, session_id: &str) -> Result<SessionGuard, GateError> {
        // Occupancy is counted while the map lock is held: sweep takes the
        // same lock, so it can never drop a slot between lookup and
        // registration and hand two turns different mutexes.
        let (slot, occupancy) = {
            let mut slots = self.slots.lock();
            let slot = slots
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        lock: Arc::new(tokio::sync::Mutex::new(())),
                        occupancy: AtomicUsize::new(0),
                        last_used: Mutex::new(Instant::now()),
                    })
                })
                .clone();
            let occupancy = slot.occupancy.fetch_add(1, Ordering::SeqCst);
            (slot, occupancy)
        };

        // Holder plus queue_depth waiters is the cap.
        if occupancy > self.queue_depth {
            slot.occupancy.fetch_sub(1, Ordering::SeqCst);
            debug!(session_id, occupancy, "session queue full");
            return Err(GateError::Busy {
                session_id: session_id.to_string(),
            });
        }

        match tokio::time::timeout(self.queue_timeout, slot.lock.clone().lock_owned()).await {
            Ok(guard) => {
                *slot.last_used.lock() = Instant::now();
                Ok(SessionGuard {
                    _lock: guard,
                    slot,
                })
            }
            Err(_) => {
                slot.occupancy.fetch_sub(1, Ordering::SeqCst);
                debug!(session_id, "queued turn timed out waiting for the session");
                Err(GateError::Busy {
                    session_id: session_id.to_string(),
                })
            }
        }
    }

    /// Drop slots idle longer than `idle_timeout` with nothing in flight.
    pub fn sweep(&self, idle_timeout: Duration) {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.occupancy.load(Ordering::SeqCst) > 0
                || slot.last_used.lock().elapsed() < idle_timeout
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, "swept idle session slots");
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(queue_depth: usize, queue_timeout_secs: u64) -> SessionGate {
        SessionGate::new(&SessionConfig {
            queue_depth,
            queue_timeout_secs,
            idle_timeout_secs: 1800,
        })
    }

    #[tokio::test]
    async fn sequential_turns_on_one_session_succeed() {
        let g = gate(4, 10);
        for _ in 0..3 {
            let guard = g.acquire("s1").await.unwrap();
            drop(guard);
        }
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let g = gate(0, 10);
        let a = g.acquire("s1").await.unwrap();
        let b = g.acquire("s2").await.unwrap();
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn queue_overflow_returns_busy_immediately() {
        let g = Arc::new(gate(0, 10));
        let held = g.acquire("s1").await.unwrap();

        // Depth 0: no waiters allowed behind the in-flight turn.
        let result = g.acquire("s1").await;
        assert!(matches!(result, Err(GateError::Busy { .. })));
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_turn_times_out_with_busy() {
        let g = Arc::new(gate(2, 1));
        let held = g.acquire("s1").await.unwrap();

        let g2 = g.clone();
        let waiter = tokio::spawn(async move { g2.acquire("s1").await });
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(matches!(waiter.await.unwrap(), Err(GateError::Busy { .. })));
        drop(held);
    }

    #[tokio::test]
    async fn queued_turn_runs_after_holder_releases() {
        let g = Arc::new(gate(2, 10));
        let held = g.acquire("s1").await.unwrap();

        let g2 = g.clone();
        let waiter = tokio::spawn(async move {
            let guard = g2.acquire("s1").await;
            guard.is_ok()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn sweep_drops_only_idle_unoccupied_slots() {
        let g = gate(4, 10);
        drop(g.acquire("idle").await.unwrap());
        let held = g.acquire("active").await.unwrap();
        assert_eq!(g.slot_count(), 2);

        g.sweep(Duration::ZERO);
        assert_eq!(g.slot_count(), 1);
        drop(held);
    }

    #[tokio::test]
    async fn sweep_keeps_the_slot_alive_for_queued_waiters() {
        let g = Arc::new(gate(2, 10));
        let held = g.acquire("s1").await.unwrap();

        let g2 = g.clone();
        let waiter = tokio::spawn(async move { g2.acquire("s1").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter is registered, so an aggressive sweep must not drop the
        // slot and break same-session serialization.
        g.sweep(Duration::ZERO);
        assert_eq!(g.slot_count(), 1);

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }
}
