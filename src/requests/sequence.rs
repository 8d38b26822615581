//! Atomic sequence state shared by request managers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Last minted sequence id and whether it is still waiting to be observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SequenceState {
    pub sequence: u32,
    pub pending: bool,
}

impl SequenceState {
    /// The state after minting a new token. Saturates at `u32::MAX` so
    /// sequence ids never decrease.
    pub fn minted(self) -> Self {
        Self {
            sequence: self.sequence.saturating_add(1),
            pending: true,
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.sequence) << 1) | u64::from(self.pending)
    }

    fn unpack(raw: u64) -> Self {
        Self {
            sequence: (raw >> 1) as u32,
            pending: raw & 1 == 1,
        }
    }
}

/// A `SequenceState` updated with a compare-and-swap loop.
#[derive(Debug)]
pub struct SequenceCell {
    value: AtomicU64,
}

impl SequenceCell {
    pub fn new(initial: SequenceState) -> Self {
        Self {
            value: AtomicU64::new(initial.pack()),
        }
    }

    pub fn get(&self) -> SequenceState {
        SequenceState::unpack(self.value.load(Ordering::Acquire))
    }

    /// Apply `f` atomically and return the states before and after.
    ///
    /// `f` may run several times under contention and must be pure.
    pub fn update(&self, f: impl Fn(SequenceState) -> SequenceState) -> (SequenceState, SequenceState) {
        let mut raw = self.value.load(Ordering::Acquire);
        loop {
            let previous = SequenceState::unpack(raw);
            let next = f(previous);
            match self
                .value
                .compare_exchange_weak(raw, next.pack(), Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return (previous, next),
                Err(actual) => raw = actual,
            }
        }
    }
}
