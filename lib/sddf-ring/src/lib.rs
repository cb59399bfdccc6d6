//! Lock-free single-producer/single-consumer ring buffers used to hand
//! packet-buffer ownership between isolated components.
//!
//! A ring never holds a lock. Correctness comes entirely from the
//! single-producer/single-consumer property, the one-slot-reserved
//! empty/full arithmetic, and the fence ordering documented on
//! [`Ring::enqueue`]/[`Ring::dequeue`] and the wake-up helpers below. Getting
//! that ordering wrong reintroduces exactly the lost-wake-up and torn-read
//! bugs this design exists to avoid, so treat every `Ordering` in this module
//! as load-bearing, not decorative.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use sddf_pool::{AddressSpace, RawAddr};

/// Wire capacity of every ring in the system, matching the external
/// interface layout. Individual deployments may configure a smaller logical
/// `size` (see [`RingHeader::new`]) but the backing storage is always this
/// many slots.
pub const CAPACITY: usize = 512;

/// One packet-buffer handoff record, exactly as it appears in shared memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct Descriptor {
    pub encoded_addr: u64,
    pub len: u32,
    pub pad: u32,
    pub cookie: u64,
}

impl Descriptor {
    pub const EMPTY: Descriptor = Descriptor {
        encoded_addr: 0,
        len: 0,
        pad: 0,
        cookie: 0,
    };

    pub fn new<A: AddressSpace>(addr: A, len: u32, cookie: u64) -> Self {
        Descriptor {
            encoded_addr: addr.to_raw().0,
            len,
            pad: 0,
            cookie,
        }
    }

    pub fn addr<A: AddressSpace>(&self) -> A {
        A::from_raw(RawAddr(self.encoded_addr))
    }
}

#[repr(transparent)]
struct Slot(UnsafeCell<Descriptor>);

// Safety: a `Slot` is only ever read by the consumer after it has observed
// (via an acquire load of `read_idx`/`write_idx`) that the producer's release
// write has completed, and only ever written by the producer before its
// release store of the index that publishes it. The two sides never access
// the same slot concurrently by construction of the protocol below.
unsafe impl Sync for Slot {}

impl Slot {
    const fn new() -> Self {
        Slot(UnsafeCell::new(Descriptor::EMPTY))
    }
}

/// Errors from a single ring operation. Both are routine backpressure
/// conditions, never fatal: callers retry on the next event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RingError {
    Full,
    Empty,
}

/// The control block for one ring: indices, size, and the two wake-up
/// request flags. This is the part that lives at a fixed, bit-exact offset
/// in shared memory.
#[repr(C)]
pub struct RingHeader {
    write_idx: AtomicU32,
    read_idx: AtomicU32,
    size: u32,
    notify_writer: AtomicU8,
    notify_reader: AtomicU8,
    _pad: [u8; 2],
}

impl RingHeader {
    pub const fn new(size: u32) -> Self {
        RingHeader {
            write_idx: AtomicU32::new(0),
            read_idx: AtomicU32::new(0),
            size,
            notify_writer: AtomicU8::new(0),
            notify_reader: AtomicU8::new(0),
            _pad: [0, 0],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// A ring handle: a control block plus its backing slot storage, with a
/// fixed wire capacity `N` and a logical `size` (`<= N`, a power of two)
/// taken from the header at construction.
///
/// `Ring` exposes only safe methods. The only unsafe step in using this
/// module is allocating the `'static` storage a `Ring` borrows, exactly as
/// with the hardware descriptor rings this design is modelled on.
pub struct Ring<'a, const N: usize> {
    header: &'a RingHeader,
    slots: &'a [Slot; N],
}

impl<'a, const N: usize> Ring<'a, N> {
    /// Builds a handle over `header` and `slots`. Panics if `header.size()`
    /// is not a power of two no greater than `N`, since that would make the
    /// modular index arithmetic below unsound.
    pub fn new(header: &'a RingHeader, slots: &'a [UnsafeCell<Descriptor>; N]) -> Self {
        let size = header.size();
        assert!(size > 0 && (size as usize) <= N, "ring size out of range");
        assert!(size.is_power_of_two(), "ring size must be a power of two");
        // Safety: `Slot` is `#[repr(transparent)]` over `UnsafeCell<Descriptor>`.
        let slots: &'a [Slot; N] = unsafe { &*(slots as *const _ as *const [Slot; N]) };
        Ring { header, slots }
    }

    fn size(&self) -> u32 {
        self.header.size
    }

    pub fn is_empty(&self) -> bool {
        self.header.write_idx.load(Ordering::Acquire) == self.header.read_idx.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let w = self.header.write_idx.load(Ordering::Acquire);
        let r = self.header.read_idx.load(Ordering::Acquire);
        w.wrapping_sub(r) == self.size()
    }

    pub fn len(&self) -> u32 {
        let w = self.header.write_idx.load(Ordering::Acquire);
        let r = self.header.read_idx.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Places `desc` onto the ring. The payload write happens-before the
    /// index publish (`Release`), so a consumer that observes the new
    /// `write_idx` is guaranteed to see the descriptor it names.
    pub fn enqueue(&self, desc: Descriptor) -> Result<(), RingError> {
        if self.is_full() {
            return Err(RingError::Full);
        }
        let w = self.header.write_idx.load(Ordering::Relaxed);
        let idx = (w % self.size()) as usize;
        // Safety: only the producer ever writes this slot, and it only does
        // so for an index it is about to publish via the release store
        // below, which the consumer has not yet observed.
        unsafe {
            *self.slots[idx].0.get() = desc;
        }
        self.header.write_idx.store(w.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Removes the oldest descriptor from the ring. The index-observation
    /// happens-before the payload read (`Acquire`), matching `enqueue`'s
    /// release.
    pub fn dequeue(&self) -> Result<Descriptor, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let r = self.header.read_idx.load(Ordering::Relaxed);
        let idx = (r % self.size()) as usize;
        // Safety: symmetric with `enqueue`: only the consumer reads this
        // slot, only after observing the producer's release of `write_idx`
        // (checked by `is_empty` above, which itself performs an Acquire
        // load).
        let desc = unsafe { *self.slots[idx].0.get() };
        self.header.read_idx.store(r.wrapping_add(1), Ordering::Release);
        Ok(desc)
    }

    /// Reads the oldest descriptor without removing it. Safe to call from
    /// the consumer side only; used by schedulers that need to know a
    /// frame's length before deciding whether to admit it.
    pub fn peek(&self) -> Result<Descriptor, RingError> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let r = self.header.read_idx.load(Ordering::Relaxed);
        let idx = (r % self.size()) as usize;
        // Safety: same justification as `dequeue`; we just don't advance
        // `read_idx` afterwards.
        Ok(unsafe { *self.slots[idx].0.get() })
    }

    /// Requests a wake-up when this ring transitions from empty to
    /// non-empty. The caller must be the consumer.
    pub fn request_reader_notify(&self) {
        self.header.notify_reader.store(1, Ordering::Relaxed);
    }

    pub fn clear_reader_notify(&self) {
        self.header.notify_reader.store(0, Ordering::Relaxed);
    }

    pub fn reader_notify_requested(&self) -> bool {
        self.header.notify_reader.load(Ordering::Relaxed) != 0
    }

    /// Requests a wake-up when this ring transitions from full to
    /// non-full. The caller must be the producer.
    pub fn request_writer_notify(&self) {
        self.header.notify_writer.store(1, Ordering::Relaxed);
    }

    pub fn clear_writer_notify(&self) {
        self.header.notify_writer.store(0, Ordering::Relaxed);
    }

    pub fn writer_notify_requested(&self) -> bool {
        self.header.notify_writer.load(Ordering::Relaxed) != 0
    }

    /// The consumer-side half of the double-check wake-up protocol: arm
    /// `notify_reader`, fence, then re-check emptiness. Returns `true` if
    /// the ring is still empty and it is safe to go idle; `false` if work
    /// appeared in the window between the last drain and arming the flag,
    /// in which case the caller must keep draining instead of sleeping.
    pub fn arm_and_recheck_empty(&self) -> bool {
        self.request_reader_notify();
        core::sync::atomic::fence(Ordering::SeqCst);
        if self.is_empty() {
            true
        } else {
            self.clear_reader_notify();
            false
        }
    }

    /// The producer-side half: after enqueueing, fence and check whether the
    /// consumer asked to be woken. Returns `true` exactly once per arming if
    /// a wake-up is owed, and clears the flag so it is only delivered once.
    pub fn producer_owes_notify(&self) -> bool {
        core::sync::atomic::fence(Ordering::SeqCst);
        if self.reader_notify_requested() {
            self.clear_reader_notify();
            true
        } else {
            false
        }
    }
}

/// Storage for one ring: a header plus its slot array, sized for `N`
/// descriptors. Intended to be placed in a `static` on the real target.
pub struct RingStorage<const N: usize> {
    pub header: RingHeader,
    pub slots: [UnsafeCell<Descriptor>; N],
}

// Safety: same argument as `Slot`'s above -- the producer and consumer sides
// never touch the same slot at the same time, by construction of the
// protocol `Ring` implements. Needed so a `RingStorage` can live in a
// `static`, which every task binary's shared-memory ring does.
unsafe impl<const N: usize> Sync for RingStorage<N> {}

impl<const N: usize> RingStorage<N> {
    pub const fn new(size: u32) -> Self {
        RingStorage {
            header: RingHeader::new(size),
            slots: [const { UnsafeCell::new(Descriptor::EMPTY) }; N],
        }
    }

    pub fn ring(&self) -> Ring<'_, N> {
        Ring::new(&self.header, &self.slots)
    }
}

/// A free ring and a used ring together, the unit of connection between two
/// adjacent components in one direction.
pub struct RingPair<'a, const N: usize> {
    pub free: Ring<'a, N>,
    pub used: Ring<'a, N>,
}

impl<'a, const N: usize> RingPair<'a, N> {
    pub fn new(free: Ring<'a, N>, used: Ring<'a, N>) -> Self {
        RingPair { free, used }
    }
}
