//! Outbound command scheduler
//!
//! At most `limit` frames leave per window. The window starts with the
//! first send after a refill; priority frames (heartbeats, identify) jump
//! the line but still count against the limit.

use std::collections::VecDeque;
use tokio::task::AbortHandle;

use crate::protocol::GatewayMessage;

/// Frames released by one drain
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub frames: Vec<GatewayMessage>,
    /// This drain started a new window; the caller arms its timer
    pub opened_window: bool,
}

#[derive(Debug)]
pub(crate) struct SendQueue {
    items: VecDeque<GatewayMessage>,
    limit: u32,
    remaining: u32,
    window_open: bool,
    timer: Option<AbortHandle>,
}

impl SendQueue {
    pub fn new(limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            items: VecDeque::new(),
            limit,
            remaining: limit,
            window_open: false,
            timer: None,
        }
    }

    pub fn push(&mut self, message: GatewayMessage, priority: bool) {
        if priority {
            self.items.push_front(message);
        } else {
            self.items.push_back(message);
        }
    }

    /// Take as many frames as the current window allows
    pub fn take_batch(&mut self) -> Batch {
        let mut batch = Batch::default();
        while self.remaining > 0 {
            let Some(message) = self.items.pop_front() else {
                break;
            };
            if !self.window_open {
                self.window_open = true;
                batch.opened_window = true;
            }
            self.remaining -= 1;
            batch.frames.push(message);
        }
        batch
    }

    pub fn set_timer(&mut self, timer: AbortHandle) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.abort();
        }
    }

    /// Window elapsed: restore the full allowance
    pub fn refill(&mut self) {
        self.remaining = self.limit;
        self.window_open = false;
        self.timer = None;
    }

    /// Drop queued frames and the window
    pub fn reset(&mut self) {
        self.items.clear();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.refill();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    fn remaining(&self) -> u32 {
        self.remaining
    }
}
