//! FIFO admission gate for one rate-limit bucket

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Strict FIFO ticket queue.
///
/// `acquire` resolves once every earlier caller has released its ticket.
/// Tickets release on drop, and a caller dropped while still waiting
/// leaves the queue without blocking the callers behind it.
#[derive(Debug, Default, Clone)]
pub struct RateGate {
    lock: Arc<Mutex<()>>,
    queued: Arc<AtomicUsize>,
}

/// Admission ticket, held for the duration of one request
#[derive(Debug)]
pub struct GateTicket {
    _guard: OwnedMutexGuard<()>,
    _pending: Pending,
}

/// A place counted in the queue before the caller starts waiting
#[derive(Debug)]
pub struct GateReservation {
    lock: Arc<Mutex<()>>,
    pending: Pending,
}

impl GateReservation {
    /// Wait for this caller's turn
    pub async fn admit(self) -> GateTicket {
        // tokio's Mutex queues waiters fairly, in call order
        let guard = self.lock.lock_owned().await;
        GateTicket {
            _guard: guard,
            _pending: self.pending,
        }
    }
}

#[derive(Debug)]
struct Pending(Arc<AtomicUsize>);

impl Pending {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the caller as queued without waiting yet
    pub fn reserve(&self) -> GateReservation {
        GateReservation {
            lock: Arc::clone(&self.lock),
            pending: Pending::enter(&self.queued),
        }
    }

    /// Wait for this caller's turn
    pub async fn acquire(&self) -> GateTicket {
        self.reserve().admit().await
    }

    /// Holder plus waiters
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
