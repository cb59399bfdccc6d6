//! TX copy shim task: interposes between one untrusted client and the TX mux,
//! copying each outgoing frame out of the client's own buffer pool into the
//! trusted pool the TX mux and driver operate on, so a client can never hand
//! the driver a buffer (or address) it doesn't actually own.
//!
//! All of the actual copy logic lives in `sddf_copy_shim::run_once`; this
//! crate only supplies the memory access, cache operations, and event-loop
//! glue around one call to it. The upstream/downstream roles are reversed
//! from `task-sddf-rx-copy`'s, but the control flow is identical -- that
//! symmetry is exactly why both tasks share one library crate underneath.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_cache::CacheOps;
use sddf_copy_shim::{run_once, CopyOutcome, DestMemory, PoolBoundsViolation, SourceMemory};
use sddf_pool::BufferPool;
use sddf_ring::RingPair;
use sddf_rt::Halt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum TxCopyEvent {
    Copied { n: u32 },
    DroppedLengthMismatch { n: u32 },
}

counted_ringbuf!(TxCopyEvent, 32, TxCopyEvent::Copied { n: 0 });

/// Owns the upstream (client-facing) and downstream (mux-facing) ring pairs
/// for one client's TX copy stage.
pub struct TxCopy<'a, const N: usize> {
    upstream: RingPair<'a, N>,
    downstream: RingPair<'a, N>,
    downstream_pool: BufferPool,
    buffer_capacity: u32,
}

impl<'a, const N: usize> TxCopy<'a, N> {
    pub fn new(upstream: RingPair<'a, N>, downstream: RingPair<'a, N>, downstream_pool: BufferPool, buffer_capacity: u32) -> Self {
        TxCopy {
            upstream,
            downstream,
            downstream_pool,
            buffer_capacity,
        }
    }

    pub fn handle_notification(
        &mut self,
        cache: &impl CacheOps,
        src: &impl SourceMemory,
        dst: &mut impl DestMemory,
    ) -> Result<CopyOutcome, Halt> {
        let outcome = run_once(&self.upstream, &self.downstream, &self.downstream_pool, self.buffer_capacity, cache, src, dst)
            .map_err(|PoolBoundsViolation { .. }| Halt::PoolAddressOutOfRange)?;
        if outcome.copied > 0 {
            ringbuf_entry!(TxCopyEvent::Copied { n: outcome.copied });
        }
        if outcome.dropped_length_mismatch > 0 {
            ringbuf_entry!(TxCopyEvent::DroppedLengthMismatch { n: outcome.dropped_length_mismatch });
        }
        Ok(outcome)
    }
}
