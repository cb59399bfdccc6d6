//! The copy shim: interposes between a mux and an untrusted client (on
//! either the RX or TX path) so the client only ever sees its own buffer
//! pool.
//!
//! The control-flow and notification bookkeeping here is deliberately a
//! direct transcription of `process_rx_complete` from the historical
//! implementation this system is descended from, including its specific
//! re-arm condition on the downstream free ring's `notify_reader` flag --
//! that bookkeeping is the one place several historical variants of this
//! component actually diverged, so this crate commits to the one variant
//! rather than re-deriving something plausible-looking from scratch. One
//! deliberate departure from that history: an address that fails the
//! destination-pool bounds check is treated as a fatal policy violation
//! here, not logged and carried on from.

#![cfg_attr(not(test), no_std)]

use sddf_cache::CacheOps;
use sddf_pool::{AddressSpace, BufferPool, ProducerVirt};
use sddf_ring::{Descriptor, RingPair};

/// Read access to a pool's backing bytes, as seen by the copy shim (which
/// has both the upstream and downstream pools mapped into its own address
/// space).
pub trait SourceMemory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8];
}

/// Write access to a pool's backing bytes.
pub trait DestMemory {
    fn write(&mut self, addr: ProducerVirt, data: &[u8]);
}

/// A destination address did not fall within the downstream pool's bounds.
/// Per policy this is always fatal: a client or mux handing back an address
/// outside its own pool is a protection violation, not a recoverable
/// condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolBoundsViolation {
    pub addr: ProducerVirt,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CopyOutcome {
    pub copied: u32,
    pub dropped_length_mismatch: u32,
    pub notify_downstream_used: bool,
    pub notify_upstream_free: bool,
}

/// Runs one batch of the copy loop: while the upstream used ring has a
/// filled buffer, the downstream free ring has an empty one, and neither the
/// upstream free ring nor the downstream used ring is full, copy one
/// packet's worth of bytes across and hand each buffer back to its owner.
pub fn run_once<const N: usize>(
    upstream: &RingPair<'_, N>,
    downstream: &RingPair<'_, N>,
    downstream_pool: &BufferPool,
    buffer_capacity: u32,
    cache: &impl CacheOps,
    src: &impl SourceMemory,
    dst: &mut impl DestMemory,
) -> Result<CopyOutcome, PoolBoundsViolation> {
    let mut outcome = CopyOutcome::default();

    while !upstream.used.is_empty()
        && !downstream.free.is_empty()
        && !upstream.free.is_full()
        && !downstream.used.is_full()
    {
        let m = upstream.used.dequeue().expect("checked non-empty above");
        let c = downstream.free.dequeue().expect("checked non-empty above");

        let c_addr: ProducerVirt = c.addr();
        if !downstream_pool.contains(c_addr) {
            return Err(PoolBoundsViolation { addr: c_addr });
        }

        if c.len < m.len {
            // Source frame doesn't fit the destination buffer: drop this
            // one frame and hand both buffers back unconsumed, rather than
            // stall the whole shim or write past the destination.
            outcome.dropped_length_mismatch += 1;
            downstream
                .free
                .enqueue(c)
                .expect("just dequeued this slot, ring cannot be full");
            upstream
                .free
                .enqueue(Descriptor::new(m.addr::<ProducerVirt>(), buffer_capacity, m.cookie))
                .expect("just dequeued this slot, ring cannot be full");
            continue;
        }

        let m_addr: ProducerVirt = m.addr();
        cache.invalidate(sddf_cache::Range::new(m_addr.0, m.len));
        let bytes = src.read(m_addr, m.len as usize);
        dst.write(c_addr, bytes);
        cache.clean(sddf_cache::Range::new(c_addr.0, m.len));

        downstream
            .used
            .enqueue(Descriptor::new(c_addr, m.len, c.cookie))
            .expect("checked downstream.used not full above");
        upstream
            .free
            .enqueue(Descriptor::new(m_addr, buffer_capacity, m.cookie))
            .expect("checked upstream.free not full above");

        outcome.copied += 1;
    }

    outcome.notify_downstream_used = outcome.copied > 0 && downstream.used.reader_notify_requested();
    outcome.notify_upstream_free =
        outcome.copied > 0 && (upstream.free.reader_notify_requested() || upstream.used.writer_notify_requested());

    if !upstream.used.is_empty() || upstream.free.reader_notify_requested() {
        downstream.free.request_reader_notify();
    } else {
        downstream.free.clear_reader_notify();
    }

    Ok(outcome)
}
