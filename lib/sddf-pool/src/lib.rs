//! Buffer pools and the three address namespaces a packet buffer's address
//! can be expressed in.
//!
//! An address crossing a namespace boundary without being translated is the
//! single most dangerous mistake a component in this system can make: a
//! physical address handed to a client, or a client's virtual address handed
//! to the NIC, corrupts memory that was never meant to be touched. Making
//! each namespace its own type turns that mistake into a type error instead
//! of a debugging session.

#![cfg_attr(not(test), no_std)]

pub const BUFFER_SIZE: usize = 2048;
pub const POOL_SLOTS: usize = 512;

/// An address as seen by the component that produced the buffer, in its own
/// virtual address space.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct ProducerVirt(pub u64);

/// The same address translated into a peer component's virtual address
/// space.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct PeerVirt(pub u64);

/// The same address translated into the physical address DMA hardware uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct Phys(pub u64);

/// A raw wire address: whatever 64-bit value is sitting in a descriptor,
/// before it has been classified into one of the three namespaces above.
///
/// Ring and descriptor types operate on `RawAddr` because the wire format
/// does not itself encode which namespace a value belongs to; that is a
/// property of which hop is reading it, supplied by the caller of
/// [`AddressSpace::translate`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct RawAddr(pub u64);

/// A trait implemented by each of the three namespace newtypes, so generic
/// ring/descriptor code can accept "some address in some namespace" and
/// round-trip it to the wire without the caller ever touching a bare `u64`.
pub trait AddressSpace: Copy {
    fn to_raw(self) -> RawAddr;
    fn from_raw(raw: RawAddr) -> Self;
}

macro_rules! impl_address_space {
    ($ty:ident) => {
        impl AddressSpace for $ty {
            fn to_raw(self) -> RawAddr {
                RawAddr(self.0)
            }
            fn from_raw(raw: RawAddr) -> Self {
                $ty(raw.0)
            }
        }
    };
}

impl_address_space!(ProducerVirt);
impl_address_space!(PeerVirt);
impl_address_space!(Phys);
impl_address_space!(RawAddr);

/// A linear mapping between two address namespaces: `peer = producer + offset`
/// (wrapping on overflow, matching the source's pointer arithmetic).
///
/// This is deliberately just an offset, not a general page table: every pool
/// in this system is a single contiguous region mapped at a fixed base in
/// each party's address space, so the translation between any two views of
/// it is one subtraction and one addition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressMap {
    from_base: u64,
    to_base: u64,
    len: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressOutOfRange;

impl AddressMap {
    pub const fn new(from_base: u64, to_base: u64, len: u64) -> Self {
        AddressMap {
            from_base,
            to_base,
            len,
        }
    }

    /// Translates `addr`, expressed in the `From` namespace, into the `To`
    /// namespace. Fails if `addr` does not fall within this map's region.
    pub fn translate<From: AddressSpace, To: AddressSpace>(
        &self,
        addr: From,
    ) -> Result<To, AddressOutOfRange> {
        let raw = addr.to_raw().0;
        let offset = raw.wrapping_sub(self.from_base);
        if offset >= self.len {
            return Err(AddressOutOfRange);
        }
        Ok(To::from_raw(RawAddr(self.to_base.wrapping_add(offset))))
    }

    /// The same mapping with its two namespaces swapped, for components that
    /// need to translate in both directions (e.g. a mux translating a
    /// client's own address out to its shared view, and a delivered buffer's
    /// shared-view address back into that client's own namespace).
    pub const fn invert(&self) -> AddressMap {
        AddressMap {
            from_base: self.to_base,
            to_base: self.from_base,
            len: self.len,
        }
    }
}

/// A fixed-size, slot-addressed buffer pool bound to one producer's virtual
/// address space.
///
/// `BufferPool` itself does not own storage -- on a real target the storage
/// is a statically allocated, DMA-addressable region handed to it at init;
/// in tests it is a plain boxed byte array. What `BufferPool` owns is the
/// bookkeeping: the base address and the mapping used to validate that an
/// address handed back by a peer actually falls within this pool.
#[derive(Copy, Clone, Debug)]
pub struct BufferPool {
    base: ProducerVirt,
    slot_size: usize,
    slots: usize,
}

impl BufferPool {
    pub const fn new(base: ProducerVirt, slot_size: usize, slots: usize) -> Self {
        BufferPool {
            base,
            slot_size,
            slots,
        }
    }

    pub const fn base(&self) -> ProducerVirt {
        self.base
    }

    pub const fn len_bytes(&self) -> u64 {
        (self.slot_size * self.slots) as u64
    }

    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub const fn slots(&self) -> usize {
        self.slots
    }

    /// Returns the slot index that `addr` falls within, if `addr` names a
    /// slot boundary inside this pool.
    pub fn slot_index(&self, addr: ProducerVirt) -> Result<usize, AddressOutOfRange> {
        let offset = addr.0.wrapping_sub(self.base.0);
        if offset >= self.len_bytes() || offset % self.slot_size as u64 != 0 {
            return Err(AddressOutOfRange);
        }
        Ok((offset / self.slot_size as u64) as usize)
    }

    /// Returns the address of slot `index`.
    pub fn slot_addr(&self, index: usize) -> Result<ProducerVirt, AddressOutOfRange> {
        if index >= self.slots {
            return Err(AddressOutOfRange);
        }
        Ok(ProducerVirt(self.base.0 + (index * self.slot_size) as u64))
    }

    /// Checks that `addr` (already translated into this pool's namespace)
    /// falls within `[base, base + len)`. This is the check every copy shim
    /// and mux must perform before trusting an address a peer handed back,
    /// per the address-space discipline invariant.
    pub fn contains(&self, addr: ProducerVirt) -> bool {
        let offset = addr.0.wrapping_sub(self.base.0);
        offset < self.len_bytes()
    }
}

/// One client's view of its own pool, bundling the pool's bounds with the
/// address maps needed to move a descriptor across the two boundaries a
/// mux/copy-shim cares about: the client's own virtual addresses translated
/// out to a peer's namespace, and a peer's addresses translated into the
/// physical namespace the NIC's DMA engine requires.
///
/// A mux or copy shim holds one `PoolView` per client rather than reaching
/// into `BufferPool`/`AddressMap` directly, so the "which pool does this
/// address belong to, and how do I get it to where it needs to go" question
/// has a single answer per client instead of being re-derived at each call
/// site.
#[derive(Copy, Clone, Debug)]
pub struct PoolView {
    pool: BufferPool,
    to_peer: AddressMap,
    to_phys: AddressMap,
}

impl PoolView {
    pub const fn new(pool: BufferPool, to_peer: AddressMap, to_phys: AddressMap) -> Self {
        PoolView { pool, to_peer, to_phys }
    }

    pub const fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Does `addr`, expressed in this client's own virtual namespace, fall
    /// within this client's pool?
    pub fn owns(&self, addr: ProducerVirt) -> bool {
        self.pool.contains(addr)
    }

    /// Translates a peer-virtual address back into this client's own
    /// namespace, checking it falls within the pool first.
    pub fn peer_to_own(&self, addr: PeerVirt) -> Result<ProducerVirt, AddressOutOfRange> {
        let own: ProducerVirt = self.to_peer.invert().translate(addr)?;
        if !self.owns(own) {
            return Err(AddressOutOfRange);
        }
        Ok(own)
    }

    /// Translates this client's own address out into the peer namespace
    /// (e.g. handing a descriptor to a mux or the driver).
    pub fn own_to_peer(&self, addr: ProducerVirt) -> Result<PeerVirt, AddressOutOfRange> {
        if !self.owns(addr) {
            return Err(AddressOutOfRange);
        }
        self.to_peer.translate(addr)
    }

    /// Translates a peer-virtual address into the physical address the NIC
    /// DMA engine requires, checking ownership first.
    pub fn peer_to_phys(&self, addr: PeerVirt) -> Result<Phys, AddressOutOfRange> {
        let own = self.peer_to_own(addr)?;
        self.to_phys.translate(own)
    }

    /// Translates this client's own address directly to physical, without a
    /// round trip through the peer namespace (used by a TX mux translating
    /// a client's outgoing frame just before handing it to the driver).
    pub fn own_to_phys(&self, addr: ProducerVirt) -> Result<Phys, AddressOutOfRange> {
        if !self.owns(addr) {
            return Err(AddressOutOfRange);
        }
        self.to_phys.translate(addr)
    }

    /// Translates a physical address (e.g. one a driver just handed back on
    /// TX completion) into this client's own namespace, checking that it
    /// falls within this client's pool.
    pub fn phys_to_own(&self, addr: Phys) -> Result<ProducerVirt, AddressOutOfRange> {
        let own: ProducerVirt = self.to_phys.invert().translate(addr)?;
        if !self.owns(own) {
            return Err(AddressOutOfRange);
        }
        Ok(own)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_view_translates_and_checks_ownership() {
        let pool = BufferPool::new(ProducerVirt(0x4000_0000), BUFFER_SIZE, POOL_SLOTS);
        let to_peer = AddressMap::new(0x4000_0000, 0x6000_0000, pool.len_bytes());
        let to_phys = AddressMap::new(0x4000_0000, 0x9000_0000, pool.len_bytes());
        let view = PoolView::new(pool, to_peer, to_phys);

        let peer: PeerVirt = view.own_to_peer(ProducerVirt(0x4000_0800)).unwrap();
        assert_eq!(peer, PeerVirt(0x6000_0800));
        assert_eq!(view.peer_to_own(peer).unwrap(), ProducerVirt(0x4000_0800));
        assert_eq!(view.peer_to_phys(peer).unwrap(), Phys(0x9000_0800));

        assert!(view.own_to_peer(ProducerVirt(0x1000_0000)).is_err());
    }

    #[test]
    fn translate_round_trips_within_range() {
        let map = AddressMap::new(0x1000_0000, 0x2000_0000, 0x10_0000);
        let peer: PeerVirt = map.translate(ProducerVirt(0x1000_0040)).unwrap();
        assert_eq!(peer, PeerVirt(0x2000_0040));
    }

    #[test]
    fn translate_rejects_out_of_range() {
        let map = AddressMap::new(0x1000_0000, 0x2000_0000, 0x10_0000);
        let result: Result<PeerVirt, _> = map.translate(ProducerVirt(0x1100_0000));
        assert_eq!(result, Err(AddressOutOfRange));
    }

    #[test]
    fn invert_round_trips_a_forward_translation() {
        let map = AddressMap::new(0x1000_0000, 0x2000_0000, 0x10_0000);
        let peer: PeerVirt = map.translate(ProducerVirt(0x1000_0040)).unwrap();
        let back: ProducerVirt = map.invert().translate(peer).unwrap();
        assert_eq!(back, ProducerVirt(0x1000_0040));
    }

    #[test]
    fn pool_slot_index_and_addr_are_inverse() {
        let pool = BufferPool::new(ProducerVirt(0x4000_0000), BUFFER_SIZE, POOL_SLOTS);
        for i in [0usize, 1, 511] {
            let addr = pool.slot_addr(i).unwrap();
            assert_eq!(pool.slot_index(addr).unwrap(), i);
        }
    }

    #[test]
    fn pool_rejects_misaligned_and_out_of_range_addresses() {
        let pool = BufferPool::new(ProducerVirt(0x4000_0000), BUFFER_SIZE, POOL_SLOTS);
        assert!(pool.slot_index(ProducerVirt(0x4000_0001)).is_err());
        assert!(pool
            .slot_index(ProducerVirt(0x4000_0000 + (POOL_SLOTS * BUFFER_SIZE) as u64))
            .is_err());
        assert!(!pool.contains(ProducerVirt(0x3fff_ffff)));
    }
}
