use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::models::error::RollError;
use crate::models::frame::{FrameBuffer, Timestamp};

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// Proof that a buffer was admitted by a particular [`ResourceGate`].
///
/// Tokens cannot be cloned or constructed outside the gate. Hand them back
/// with [`ResourceGate::release`].
#[must_use = "a dropped token permanently shrinks the gate"]
#[derive(Debug)]
pub struct GateToken {
    gate_id: u64,
    armed: bool,
}

impl Drop for GateToken {
    fn drop(&mut self) {
        if self.armed {
            log::error!("gate token of gate {} dropped without release", self.gate_id);
        }
    }
}

/// Counting admission gate bounding the number of sensor buffers held at once.
///
/// Acquisition never blocks: when the gate is exhausted the caller is expected
/// to give the buffer straight back to the sensor.
#[derive(Debug)]
pub struct ResourceGate {
    id: u64,
    capacity: usize,
    available: AtomicUsize,
}

impl ResourceGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            available: AtomicUsize::new(capacity),
        }
    }

    pub fn acquire(&self) -> Option<GateToken> {
        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(GateToken {
                        gate_id: self.id,
                        armed: true,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Return a token. Tokens from another gate and releases beyond capacity
    /// are rejected; debug builds fail fast on either.
    pub fn release(&self, mut token: GateToken) -> Result<(), RollError> {
        token.armed = false;
        if token.gate_id != self.id {
            log::error!(
                "gate {} rejected a token issued by gate {}",
                self.id,
                token.gate_id
            );
            debug_assert!(false, "foreign gate token released");
            return Err(RollError::ForeignToken);
        }

        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                log::error!("gate {} released beyond its capacity of {}", self.id, self.capacity);
                debug_assert!(false, "gate token released twice");
                return Err(RollError::TokenOverRelease);
            }
            match self.available.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.capacity - self.available()
    }
}

/// A sensor buffer together with the gate token that admitted it.
///
/// Buffer and token always travel and get released together.
#[derive(Debug)]
pub struct AdmittedFrame {
    buffer: FrameBuffer,
    token: GateToken,
}

impl AdmittedFrame {
    pub fn new(buffer: FrameBuffer, token: GateToken) -> Self {
        Self { buffer, token }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.buffer.timestamp()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Give the buffer back to the sensor and the token back to `gate`.
    pub fn release(self, gate: &ResourceGate) {
        let Self { buffer, token } = self;
        buffer.release();
        if let Err(e) = gate.release(token) {
            log::error!("failed to return gate token: {}", e);
        }
    }
}
