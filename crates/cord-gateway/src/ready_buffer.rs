//! Readiness gate for dispatches
//!
//! Until the session is ready only bootstrap events pass; the rest wait in
//! arrival order. Once anything is waiting, later dispatches queue behind
//! it even after ready, so the consumer never sees them out of order.

use std::collections::VecDeque;

use crate::events::{Dispatch, GatewayEventType};

#[derive(Debug, Default)]
pub struct ReadyBuffer {
    pending: VecDeque<Dispatch>,
}

impl ReadyBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass `dispatch` through, or hold it and return `None`
    pub fn admit(&mut self, ready: bool, dispatch: Dispatch) -> Option<Dispatch> {
        let hold = if ready {
            !self.pending.is_empty()
        } else {
            !GatewayEventType::is_bootstrap_name(&dispatch.kind)
        };

        if hold {
            self.pending.push_back(dispatch);
            None
        } else {
            Some(dispatch)
        }
    }

    /// Next held dispatch, once ready
    pub fn pop(&mut self, ready: bool) -> Option<Dispatch> {
        if ready {
            self.pending.pop_front()
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
