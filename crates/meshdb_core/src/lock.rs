//! Owned write locks.
//!
//! Transactions hold their lock across method calls and move between
//! threads, so the guard must own its lock rather than borrow it.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// An exclusive lock whose guard owns a handle to it.
#[derive(Debug, Default)]
pub(crate) struct WriteGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteGate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until the gate is free, then takes it.
    pub(crate) fn acquire(self: &Arc<Self>) -> GateGuard {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
        GateGuard {
            gate: Arc::clone(self),
        }
    }

    /// Takes the gate if it is free.
    #[cfg(test)]
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<GateGuard> {
        let mut held = self.held.lock();
        if *held {
            return None;
        }
        *held = true;
        Some(GateGuard {
            gate: Arc::clone(self),
        })
    }
}

/// Releases its [`WriteGate`] on drop.
#[derive(Debug)]
pub(crate) struct GateGuard {
    gate: Arc<WriteGate>,
}

impl GateGuard {
    /// Returns true if this guard holds `gate`.
    pub(crate) fn guards(&self, gate: &Arc<WriteGate>) -> bool {
        Arc::ptr_eq(&self.gate, gate)
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        *self.gate.held.lock() = false;
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exclusive_until_dropped() {
        let gate = WriteGate::new();
        let guard = gate.acquire();
        assert!(gate.try_acquire().is_none());
        assert!(guard.guards(&gate));
        drop(guard);
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn waiter_wakes_on_release() {
        let gate = WriteGate::new();
        let guard = gate.acquire();
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let _guard = gate.acquire();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
