//! Interrupt vector table and the bounded interrupt queue that feeds it.
//!
//! A fixed-size source-to-handler table and a fixed-capacity FIFO of
//! pending IRQ source numbers, guarded by a `Mutex` plus `Condvar` rather
//! than a polling spinlock.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// IRQ source numbers are a single byte.
pub const IRQ_SOURCE_COUNT: usize = 256;
pub const IRQ_QUEUE_SIZE: usize = 32;

pub const IRQ_UART_RX: u8 = 0;
pub const IRQ_UART_TX: u8 = 1;

/// Source -> handler address. Entries default to 0 (unregistered).
pub struct InterruptVectorTable {
    handlers: Mutex<[u32; IRQ_SOURCE_COUNT]>,
}

impl InterruptVectorTable {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new([0u32; IRQ_SOURCE_COUNT]),
        }
    }

    pub fn register(&self, source: u8, handler_address: u32) {
        self.handlers.lock().unwrap()[source as usize] = handler_address;
    }

    /// `None` means no handler is registered for this source.
    pub fn lookup(&self, source: u8) -> Option<u32> {
        let addr = self.handlers.lock().unwrap()[source as usize];
        (addr != 0).then_some(addr)
    }
}

impl Default for InterruptVectorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO of pending IRQ source numbers. Producers (the UART thread,
/// the PIC dispatch in `memory::bus`) call [`Self::try_push`]; the
/// interpreter drains it with [`Self::try_pop`] at instruction boundaries,
/// only when interrupts are enabled — edge-triggered, never mid-instruction.
pub struct InterruptQueue {
    pending: Mutex<VecDeque<u8>>,
    not_empty: Condvar,
}

impl InterruptQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(IRQ_QUEUE_SIZE)),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues a source number. Returns `false` and drops the interrupt if
    /// the queue is already at capacity — logged, not fatal.
    pub fn try_push(&self, source: u8) -> bool {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= IRQ_QUEUE_SIZE {
            tracing::warn!(source, "interrupt queue full, dropping IRQ");
            return false;
        }
        pending.push_back(source);
        self.not_empty.notify_one();
        true
    }

    /// Non-blocking dequeue, used by the interpreter's instruction-boundary
    /// check so it never stalls execution waiting on an interrupt.
    pub fn try_pop(&self) -> Option<u8> {
        self.pending.lock().unwrap().pop_front()
    }

    /// Blocks (bounded by `timeout`) until an interrupt is pending or the
    /// timeout elapses. Used by test harnesses and by any consumer that
    /// isn't on the hot instruction-dispatch path.
    pub fn wait_pop(&self, timeout: Duration) -> Option<u8> {
        let pending = self.pending.lock().unwrap();
        let (mut pending, _timeout_result) = self
            .not_empty
            .wait_timeout_while(pending, timeout, |q| q.is_empty())
            .unwrap();
        pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InterruptQueue {
    fn default() -> Self {
        Self::new()
    }
}
