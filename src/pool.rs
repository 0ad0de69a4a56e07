//! Fixed-size pool of reusable transfer buffers.
//!
//! Buffers live in a vector addressed by slot index. A free buffer is stored
//! in its slot; an in-flight buffer is owned by the transport (or by the
//! engine while it handles that buffer's completion) and its slot only
//! records that fact. The free list is a stack of slot indices, so acquire
//! and release are O(1) and no slot is ever aliased.
//!
//! At every point `in_flight() + free_len() == depth()`.

use crate::error::{Error, Result};

enum Slot<B> {
    Free(B),
    InFlight,
}

/// A fixed collection of transfer buffers partitioned into free and in-flight.
pub struct TransferPool<B> {
    slots: Vec<Slot<B>>,
    free: Vec<usize>,
    buffer_len: usize,
}

impl<B> TransferPool<B> {
    /// Build `depth` buffers of `buffer_len` bytes, all initially free.
    ///
    /// `alloc` is called once per slot. Fails with `ResourceExhausted` if the
    /// bookkeeping for the pool cannot be reserved, or with whatever error
    /// `alloc` reports for an individual buffer.
    pub fn allocate<F>(depth: usize, buffer_len: usize, mut alloc: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<B>,
    {
        let exhausted = || Error::ResourceExhausted {
            bytes: depth.saturating_mul(buffer_len),
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(depth).map_err(|_| exhausted())?;
        let mut free = Vec::new();
        free.try_reserve_exact(depth).map_err(|_| exhausted())?;

        for index in 0..depth {
            slots.push(Slot::Free(alloc(buffer_len)?));
            // Acquire pops from the back; lowest slots go out first.
            free.push(depth - 1 - index);
        }

        Ok(Self {
            slots,
            free,
            buffer_len,
        })
    }

    /// Total number of buffers.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Size of each buffer in bytes.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Number of buffers on the free list.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of buffers not on the free list.
    pub fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether `slot` is currently in flight.
    pub fn is_in_flight(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Slot::InFlight))
    }

    /// Take a buffer off the free list, marking its slot in flight.
    pub fn acquire_free(&mut self) -> Result<(usize, B)> {
        let slot = self.free.pop().ok_or(Error::PoolEmpty)?;
        match std::mem::replace(&mut self.slots[slot], Slot::InFlight) {
            Slot::Free(buffer) => Ok((slot, buffer)),
            Slot::InFlight => Err(Error::ProtocolViolation("free list held an in-flight slot")),
        }
    }

    /// Validate that a completion reported for `slot` matches an in-flight buffer.
    ///
    /// The slot stays in flight: the engine now holds the buffer and either
    /// resubmits it or hands it to [`release`](Self::release).
    pub fn complete(&self, slot: usize) -> Result<()> {
        match self.slots.get(slot) {
            Some(Slot::InFlight) => Ok(()),
            Some(Slot::Free(_)) => Err(Error::ProtocolViolation(
                "completion reported for a free buffer",
            )),
            None => Err(Error::ProtocolViolation(
                "completion reported for an unknown slot",
            )),
        }
    }

    /// Return an in-flight buffer to the free list.
    ///
    /// Releasing a slot that is already free is rejected rather than
    /// corrupting the free list.
    pub fn release(&mut self, slot: usize, buffer: B) -> Result<()> {
        let Some(entry) = self.slots.get_mut(slot) else {
            return Err(Error::ProtocolViolation("release of an unknown slot"));
        };
        if matches!(entry, Slot::Free(_)) {
            return Err(Error::ProtocolViolation("buffer released twice"));
        }
        *entry = Slot::Free(buffer);
        self.free.push(slot);
        Ok(())
    }

    /// Release every buffer; all of them must be back on the free list.
    pub fn destroy(self) -> Result<Vec<B>> {
        if self.in_flight() != 0 {
            return Err(Error::ProtocolViolation(
                "pool destroyed with buffers in flight",
            ));
        }
        let mut buffers = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot {
                Slot::Free(buffer) => buffers.push(buffer),
                Slot::InFlight => {
                    return Err(Error::ProtocolViolation("in-flight slot during destroy"))
                }
            }
        }
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(depth: usize) -> TransferPool<Vec<u8>> {
        TransferPool::allocate(depth, 64, |len| Ok(vec![0u8; len])).unwrap()
    }

    fn conserved<B>(pool: &TransferPool<B>) -> bool {
        pool.in_flight() + pool.free_len() == pool.depth()
    }

    #[test]
    fn test_allocate_all_free() {
        let pool = pool(4);
        assert_eq!(pool.depth(), 4);
        assert_eq!(pool.free_len(), 4);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.buffer_len(), 64);
    }

    #[test]
    fn test_acquire_until_empty() {
        let mut pool = pool(3);
        let mut slots = Vec::new();
        for _ in 0..3 {
            let (slot, buffer) = pool.acquire_free().unwrap();
            assert_eq!(buffer.len(), 64);
            assert!(pool.is_in_flight(slot));
            assert!(conserved(&pool));
            slots.push(slot);
        }
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);
        assert!(matches!(pool.acquire_free(), Err(Error::PoolEmpty)));
    }

    #[test]
    fn test_release_and_reacquire() {
        let mut pool = pool(2);
        let (slot, mut buffer) = pool.acquire_free().unwrap();
        buffer[0] = 0x5A;
        pool.complete(slot).unwrap();
        pool.release(slot, buffer).unwrap();
        assert!(conserved(&pool));
        assert_eq!(pool.in_flight(), 0);

        let (again, buffer) = pool.acquire_free().unwrap();
        assert_eq!(again, slot);
        assert_eq!(buffer[0], 0x5A);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut pool = pool(2);
        let (slot, buffer) = pool.acquire_free().unwrap();
        pool.release(slot, buffer).unwrap();

        let err = pool.release(slot, vec![0u8; 64]).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(pool.free_len(), 2);
        assert!(conserved(&pool));
    }

    #[test]
    fn test_complete_rejects_free_and_unknown_slots() {
        let pool = pool(2);
        assert!(pool.complete(0).is_err());
        assert!(pool.complete(9).is_err());
    }

    #[test]
    fn test_destroy_requires_drained_pool() {
        let mut pool = pool(2);
        let (_slot, _buffer) = pool.acquire_free().unwrap();
        assert!(pool.destroy().is_err());

        let pool = self::pool(2);
        assert_eq!(pool.destroy().unwrap().len(), 2);
    }

    #[test]
    fn test_allocation_failure_surfaces() {
        let result: Result<TransferPool<Vec<u8>>> =
            TransferPool::allocate(4, 64, |_| Err(Error::ResourceExhausted { bytes: 64 }));
        assert!(matches!(result, Err(Error::ResourceExhausted { .. })));
    }

    #[test]
    fn test_conservation_through_churn() {
        let mut pool = pool(4);
        let mut held = Vec::new();
        for round in 0..32 {
            if round % 3 == 2 {
                if let Some((slot, buffer)) = held.pop() {
                    pool.release(slot, buffer).unwrap();
                }
            } else if let Ok(entry) = pool.acquire_free() {
                held.push(entry);
            }
            assert!(conserved(&pool));
            assert_eq!(pool.in_flight(), held.len());
        }
    }
}
