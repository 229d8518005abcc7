//! Bounded priority transmit queue.
//!
//! Order: higher priority first; within one priority, admission order.
//! Admission happens under the same lock that allocates sequence numbers,
//! so frames of one channel leave in sequence order, across the 255 -> 0
//! wrap included.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;
use sixpack_frame::{Frame, Priority};

use crate::error::{LinkError, Result};

/// A frame ready for the wire together with its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub frame: Frame,
    pub encoded: Bytes,
}

#[derive(Debug)]
struct Entry {
    priority: Priority,
    ticket: u64,
    outbound: Outbound,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: larger priority wins, then the older ticket.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.ticket.cmp(&self.ticket))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

#[derive(Debug)]
pub struct TransmitQueue {
    heap: BinaryHeap<Entry>,
    capacity: usize,
    next_ticket: u64,
}

impl TransmitQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            next_ticket: 0,
        }
    }

    pub fn push(&mut self, outbound: Outbound) -> Result<()> {
        if self.is_full() {
            return Err(LinkError::QueueFull {
                capacity: self.capacity,
            });
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.heap.push(Entry {
            priority: outbound.frame.priority,
            ticket,
            outbound,
        });
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Outbound> {
        self.heap.pop().map(|entry| entry.outbound)
    }

    /// Remove every queued frame in transmit order.
    pub fn drain_ordered(&mut self) -> Vec<Outbound> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(outbound) = self.pop() {
            out.push(outbound);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
