//! Interrupt queue and queueing control.
//!
//! Software (`INT`) and hardware interrupts share one FIFO. While queueing
//! is on (during a handler, or after `IAQ` with a nonzero operand) messages
//! stay in the queue; otherwise the CPU delivers at most one per
//! instruction. A queue that would grow past its capacity sets the DCPU on
//! fire.

use serde::{Serialize, Deserialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Maximum number of pending interrupts.
pub const INTERRUPT_QUEUE_CAPACITY: usize = 256;

/// Pending interrupt messages plus the queueing flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptQueue {
    pending: VecDeque<u16>,
    queueing: bool,
}

impl InterruptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    ///
    /// Fails without modifying the queue if it already holds
    /// [`INTERRUPT_QUEUE_CAPACITY`] messages.
    pub fn push(&mut self, message: u16) -> Result<(), InterruptError> {
        if self.pending.len() >= INTERRUPT_QUEUE_CAPACITY {
            return Err(InterruptError::Overflow { message });
        }
        self.pending.push_back(message);
        Ok(())
    }

    /// Take the next message for delivery, unless queueing holds it back.
    pub fn next_deliverable(&mut self) -> Option<u16> {
        if self.queueing {
            return None;
        }
        self.pending.pop_front()
    }

    pub fn is_queueing(&self) -> bool {
        self.queueing
    }

    pub fn set_queueing(&mut self, queueing: bool) {
        self.queueing = queueing;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending messages in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.pending.iter().copied()
    }

    /// Drop every pending message and turn queueing off.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.queueing = false;
    }
}

/// Errors raised by the interrupt queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterruptError {
    #[error("interrupt queue overflow while queueing message {message:#06x}")]
    Overflow { message: u16 },
}
