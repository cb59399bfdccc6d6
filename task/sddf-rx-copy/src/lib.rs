//! RX copy shim task: interposes between the RX mux and one untrusted client,
//! copying each delivered frame into that client's own buffer pool so the
//! client never sees (or can corrupt) a buffer it doesn't own.
//!
//! All of the actual copy logic lives in `sddf_copy_shim::run_once`; this
//! crate only supplies the memory access, cache operations, and event-loop
//! glue around one call to it.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_cache::CacheOps;
use sddf_copy_shim::{run_once, CopyOutcome, DestMemory, PoolBoundsViolation, SourceMemory};
use sddf_pool::BufferPool;
use sddf_ring::RingPair;
use sddf_rt::Halt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum RxCopyEvent {
    Copied { n: u32 },
    DroppedLengthMismatch { n: u32 },
}

counted_ringbuf!(RxCopyEvent, 32, RxCopyEvent::Copied { n: 0 });

/// Owns the upstream (mux-facing) and downstream (client-facing) ring
/// pairs for one client's copy stage.
pub struct RxCopy<'a, const N: usize> {
    upstream: RingPair<'a, N>,
    downstream: RingPair<'a, N>,
    downstream_pool: BufferPool,
    buffer_capacity: u32,
}

impl<'a, const N: usize> RxCopy<'a, N> {
    pub fn new(upstream: RingPair<'a, N>, downstream: RingPair<'a, N>, downstream_pool: BufferPool, buffer_capacity: u32) -> Self {
        RxCopy {
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
            ringbuf_entry!(RxCopyEvent::Copied { n: outcome.copied });
        }
        if outcome.dropped_length_mismatch > 0 {
            ringbuf_entry!(RxCopyEvent::DroppedLengthMismatch { n: outcome.dropped_length_mismatch });
        }
        Ok(outcome)
    }
}
