//! The NIC driver: owns the hardware descriptor rings, translates between
//! them and the adjacent shared rings, and services the IRQ.
//!
//! [`NicFamily`] is the capability boundary between this driver's shared
//! RX/TX refill-and-complete state machine and a specific piece of hardware.
//! [`FamilyA`] and [`FamilyB`] model the two descriptor shapes this system
//! supports; both represent their hardware words as atomics exactly the way
//! `drv/stm32h7-eth/src/ring.rs` represents DMA descriptor words, since on a
//! real target these are volatile, concurrently-observed memory and on the
//! host they stand in for it. [`Driver`] is generic over `F: NicFamily` and
//! does not know which family it is driving.

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU32, Ordering};

use sddf_cache::CacheOps;
use sddf_pool::{AddressMap, AddressSpace, Phys, PeerVirt};
use sddf_ring::{Descriptor, Ring};

pub type Cookie = u64;
pub const NULL_COOKIE: Cookie = u64::MAX;

bitflags::bitflags! {
    /// The three conditions the IRQ handler must distinguish, independent of
    /// which hardware family raised them.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct IrqBits: u32 {
        const RX_COMPLETE = 1 << 0;
        const TX_COMPLETE = 1 << 1;
        const BUS_ERROR   = 1 << 2;
    }
}

/// The capability set a hardware descriptor family must provide. The driver
/// state machine (refill/complete loops, IRQ drain) is written once against
/// this trait and never touches a hardware bit pattern directly.
pub trait NicFamily {
    fn setup(&mut self);
    fn refill_rx_slot(&self, idx: usize, phys: Phys);
    fn is_rx_slot_owned_by_dma(&self, idx: usize) -> bool;
    fn rx_slot_len(&self, idx: usize) -> u32;
    fn send_tx_slot(&self, idx: usize, phys: Phys, len: u32);
    fn is_tx_slot_owned_by_dma(&self, idx: usize) -> bool;
    fn irq_bits(&self) -> IrqBits;
}

/// A system bus error is fatal; a recovered cookie that is null or doesn't
/// match any outstanding buffer is a programming error in the driver's own
/// accounting, asserted rather than recovered from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DriverError {
    BusError,
    LostDescriptor,
}

/// Whether a driver method ended up owing a wake-up to its upstream
/// (free-ring) peer or its downstream (used-ring) peer. The task wrapper
/// decides whether to deliver that wake-up immediately or coalesce it with
/// `Notifier::notify_delayed`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HandlerOutcome {
    pub woke_upstream: bool,
    pub woke_downstream: bool,
}

#[derive(Copy, Clone)]
struct Shadow {
    cookie: Cookie,
    addr: u64,
}

impl Shadow {
    const EMPTY: Shadow = Shadow {
        cookie: NULL_COOKIE,
        addr: 0,
    };
}

/// The driver's own view of one hardware ring: a write/read index pair,
/// exactly the `next`-index bookkeeping `TxRing`/`RxRing` keep, plus a shadow
/// table recovering the cookie (and, for RX, the address) that was installed
/// at refill time, since the hardware descriptor itself does not carry it
/// back out.
struct HwRing<const HWN: usize> {
    write: u32,
    read: u32,
    shadow: [Shadow; HWN],
}

impl<const HWN: usize> HwRing<HWN> {
    const fn new() -> Self {
        HwRing {
            write: 0,
            read: 0,
            shadow: [Shadow::EMPTY; HWN],
        }
    }

    fn len(&self) -> u32 {
        self.write.wrapping_sub(self.read)
    }

    fn is_empty(&self) -> bool {
        self.write == self.read
    }

    fn is_full(&self) -> bool {
        self.len() as usize == HWN
    }

    fn write_idx(&self) -> usize {
        (self.write as usize) % HWN
    }

    fn read_idx(&self) -> usize {
        (self.read as usize) % HWN
    }
}

/// Owns one NIC's hardware descriptor rings and the shared-ring plumbing
/// around them. Generic over the descriptor family `F` and the hardware
/// ring length `HWN`.
pub struct Driver<F: NicFamily, const HWN: usize> {
    family: F,
    rx: HwRing<HWN>,
    tx: HwRing<HWN>,
    rx_to_phys: AddressMap,
}

impl<F: NicFamily, const HWN: usize> Driver<F, HWN> {
    /// `rx_to_phys` translates the RX free ring's peer-virtual addresses
    /// into the physical addresses the NIC DMA engine requires; the TX path
    /// needs no such map because the TX mux performs that translation
    /// itself before handing a descriptor to the driver.
    pub fn new(mut family: F, rx_to_phys: AddressMap) -> Self {
        family.setup();
        Driver {
            family,
            rx: HwRing::new(),
            tx: HwRing::new(),
            rx_to_phys,
        }
    }

    /// While the hardware RX ring has a free slot and the upstream free ring
    /// has a descriptor, installs it into hardware. Requests a wake-up on
    /// the upstream free ring iff it drained empty before the hardware ring
    /// filled.
    pub fn refill_rx<const N: usize>(&mut self, upstream_free: &Ring<'_, N>) -> HandlerOutcome {
        while !self.rx.is_full() && !upstream_free.is_empty() {
            let d = upstream_free.dequeue().expect("checked non-empty above");
            let peer_addr: PeerVirt = d.addr();
            let phys: Phys = self
                .rx_to_phys
                .translate(peer_addr)
                .expect("rx buffer address outside the driver's configured pool mapping");
            let idx = self.rx.write_idx();
            self.family.refill_rx_slot(idx, phys);
            self.rx.shadow[idx] = Shadow {
                cookie: d.cookie,
                addr: peer_addr.0,
            };
            self.rx.write = self.rx.write.wrapping_add(1);
        }
        if upstream_free.is_empty() {
            upstream_free.request_reader_notify();
        } else {
            upstream_free.clear_reader_notify();
        }
        HandlerOutcome::default()
    }

    /// While the oldest hardware RX slot is no longer owned by DMA and the
    /// downstream used ring has space, recovers the stashed cookie and
    /// address and hands the packet downstream.
    pub fn complete_rx<const N: usize>(&mut self, downstream_used: &Ring<'_, N>) -> Result<HandlerOutcome, DriverError> {
        let mut completed = 0u32;
        while !self.rx.is_empty() && !downstream_used.is_full() {
            let idx = self.rx.read_idx();
            if self.family.is_rx_slot_owned_by_dma(idx) {
                break;
            }
            let shadow = self.rx.shadow[idx];
            if shadow.cookie == NULL_COOKIE {
                return Err(DriverError::LostDescriptor);
            }
            let len = self.family.rx_slot_len(idx);
            self.rx.shadow[idx] = Shadow::EMPTY;
            downstream_used
                .enqueue(Descriptor::new(PeerVirt(shadow.addr), len, shadow.cookie))
                .expect("checked downstream_used not full above");
            self.rx.read = self.rx.read.wrapping_add(1);
            completed += 1;
        }
        Ok(HandlerOutcome {
            woke_upstream: false,
            woke_downstream: completed > 0 && downstream_used.reader_notify_requested(),
        })
    }

    /// While the hardware TX ring has a free slot and the upstream used ring
    /// has a descriptor, installs it into hardware. The descriptor's address
    /// is already physical: the TX mux performs that translation before a
    /// frame ever reaches the driver.
    pub fn send_tx<const N: usize>(&mut self, upstream_used: &Ring<'_, N>) -> HandlerOutcome {
        while !self.tx.is_full() && !upstream_used.is_empty() {
            let d = upstream_used.dequeue().expect("checked non-empty above");
            let phys: Phys = d.addr();
            let idx = self.tx.write_idx();
            self.family.send_tx_slot(idx, phys, d.len);
            self.tx.shadow[idx] = Shadow {
                cookie: d.cookie,
                addr: phys.0,
            };
            self.tx.write = self.tx.write.wrapping_add(1);
        }
        HandlerOutcome::default()
    }

    /// While the oldest hardware TX slot is no longer marked ready, recovers
    /// its cookie and returns the buffer (at full `buffer_capacity`, not the
    /// length that was actually sent) to the upstream free ring.
    pub fn complete_tx<const N: usize>(
        &mut self,
        upstream_free: &Ring<'_, N>,
        buffer_capacity: u32,
    ) -> Result<HandlerOutcome, DriverError> {
        let mut completed = 0u32;
        while !self.tx.is_empty() && !upstream_free.is_full() {
            let idx = self.tx.read_idx();
            if self.family.is_tx_slot_owned_by_dma(idx) {
                break;
            }
            let shadow = self.tx.shadow[idx];
            if shadow.cookie == NULL_COOKIE {
                return Err(DriverError::LostDescriptor);
            }
            self.tx.shadow[idx] = Shadow::EMPTY;
            upstream_free
                .enqueue(Descriptor::new(Phys(shadow.addr), buffer_capacity, shadow.cookie))
                .expect("checked upstream_free not full above");
            self.tx.read = self.tx.read.wrapping_add(1);
            completed += 1;
        }
        Ok(HandlerOutcome {
            woke_upstream: completed > 0 && upstream_free.reader_notify_requested(),
            woke_downstream: false,
        })
    }

    /// Reads the IRQ register and, unless it reports a bus error, drains
    /// TX-complete, RX-complete and RX-refill in that order. Each stage's
    /// own while loop already drains as far as the current hardware state
    /// allows, so one call here corresponds to one full drain of the
    /// register for the work that was pending when it fired.
    pub fn handle_irq<const N: usize>(
        &mut self,
        rx_free: &Ring<'_, N>,
        rx_used: &Ring<'_, N>,
        tx_used: &Ring<'_, N>,
        tx_free: &Ring<'_, N>,
        buffer_capacity: u32,
    ) -> Result<HandlerOutcome, DriverError> {
        if self.family.irq_bits().contains(IrqBits::BUS_ERROR) {
            return Err(DriverError::BusError);
        }
        let tx_done = self.complete_tx(tx_free, buffer_capacity)?;
        let rx_done = self.complete_rx(rx_used)?;
        self.refill_rx(rx_free);
        Ok(HandlerOutcome {
            woke_upstream: tx_done.woke_upstream,
            woke_downstream: rx_done.woke_downstream,
        })
    }
}

/// Cleans the payload the TX mux/client already wrote before handing the
/// descriptor to the driver. Not called by [`Driver`] itself (TX cache
/// maintenance is the upstream stage's responsibility, per the cache
/// discipline this system follows), but provided here so a task wrapper can
/// perform it right before `send_tx` without importing `sddf-cache`
/// separately.
pub fn clean_tx_payload(cache: &impl CacheOps, phys: Phys, len: u32) {
    cache.clean(sddf_cache::Range::new(phys.0, len));
}

/// Family A: a packed `{u16 len; u16 stat}` word plus a 32-bit physical
/// address, modelled as two atomics per slot the same way
/// `drv/stm32h7-eth/src/ring.rs` models its descriptor words -- the status
/// half occupies the high 16 bits of `word` so `OWN_DMA`/`WRAP`/`LAST` sit at
/// `16 + {15, 13, 11}`.
pub struct FamilyA<const HWN: usize> {
    rx_word: [AtomicU32; HWN],
    rx_addr: [AtomicU32; HWN],
    tx_word: [AtomicU32; HWN],
    tx_addr: [AtomicU32; HWN],
    irq: AtomicU32,
}

impl<const HWN: usize> FamilyA<HWN> {
    pub const OWN_DMA: u32 = 1 << (16 + 15);
    pub const WRAP: u32 = 1 << (16 + 13);
    pub const LAST: u32 = 1 << (16 + 11);
    pub const ADD_CRC: u32 = 1 << (16 + 10);

    pub const fn new() -> Self {
        FamilyA {
            rx_word: [const { AtomicU32::new(0) }; HWN],
            rx_addr: [const { AtomicU32::new(0) }; HWN],
            tx_word: [const { AtomicU32::new(0) }; HWN],
            tx_addr: [const { AtomicU32::new(0) }; HWN],
            irq: AtomicU32::new(0),
        }
    }

    /// Test/bring-up hook: sets the bits a real interrupt controller would
    /// set, so a surrounding test or the IRQ entry stub can drive
    /// `Driver::handle_irq`.
    pub fn raise_irq(&self, bits: IrqBits) {
        self.irq.fetch_or(bits.bits(), Ordering::Release);
    }
}

impl<const HWN: usize> Default for FamilyA<HWN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const HWN: usize> NicFamily for FamilyA<HWN> {
    fn setup(&mut self) {
        for i in 0..HWN {
            let wrap = if i == HWN - 1 { Self::WRAP } else { 0 };
            self.rx_word[i].store(wrap, Ordering::Relaxed);
            self.tx_word[i].store(wrap, Ordering::Relaxed);
        }
    }

    fn refill_rx_slot(&self, idx: usize, phys: Phys) {
        let wrap = if idx == HWN - 1 { Self::WRAP } else { 0 };
        self.rx_addr[idx].store(phys.0 as u32, Ordering::Relaxed);
        self.rx_word[idx].store(Self::OWN_DMA | wrap, Ordering::Release);
    }

    fn is_rx_slot_owned_by_dma(&self, idx: usize) -> bool {
        self.rx_word[idx].load(Ordering::Acquire) & Self::OWN_DMA != 0
    }

    fn rx_slot_len(&self, idx: usize) -> u32 {
        self.rx_word[idx].load(Ordering::Acquire) & 0xffff
    }

    fn send_tx_slot(&self, idx: usize, phys: Phys, len: u32) {
        let wrap = if idx == HWN - 1 { Self::WRAP } else { 0 };
        self.tx_addr[idx].store(phys.0 as u32, Ordering::Relaxed);
        self.tx_word[idx].store(Self::OWN_DMA | Self::LAST | Self::ADD_CRC | wrap | (len & 0xffff), Ordering::Release);
    }

    fn is_tx_slot_owned_by_dma(&self, idx: usize) -> bool {
        self.tx_word[idx].load(Ordering::Acquire) & Self::OWN_DMA != 0
    }

    fn irq_bits(&self) -> IrqBits {
        IrqBits::from_bits_truncate(self.irq.swap(0, Ordering::AcqRel))
    }
}

/// Family B: a four-word `{status, cntl, addr, next}` descriptor, with
/// `OWN_DMA` at bit 31 of `status` and the chain/framing bits packed into
/// `cntl`.
pub struct FamilyB<const HWN: usize> {
    rx_status: [AtomicU32; HWN],
    rx_cntl: [AtomicU32; HWN],
    rx_addr: [AtomicU32; HWN],
    tx_status: [AtomicU32; HWN],
    tx_cntl: [AtomicU32; HWN],
    tx_addr: [AtomicU32; HWN],
    irq: AtomicU32,
}

impl<const HWN: usize> FamilyB<HWN> {
    pub const OWN_DMA: u32 = 1 << 31;
    pub const RX_CHAIN: u32 = 1 << 0;
    pub const TX_CHAIN: u32 = 1 << 0;
    pub const TX_FIRST: u32 = 1 << 1;
    pub const TX_LAST: u32 = 1 << 2;
    pub const TX_INT: u32 = 1 << 3;

    pub const fn new() -> Self {
        FamilyB {
            rx_status: [const { AtomicU32::new(0) }; HWN],
            rx_cntl: [const { AtomicU32::new(0) }; HWN],
            rx_addr: [const { AtomicU32::new(0) }; HWN],
            tx_status: [const { AtomicU32::new(0) }; HWN],
            tx_cntl: [const { AtomicU32::new(0) }; HWN],
            tx_addr: [const { AtomicU32::new(0) }; HWN],
            irq: AtomicU32::new(0),
        }
    }

    pub fn raise_irq(&self, bits: IrqBits) {
        self.irq.fetch_or(bits.bits(), Ordering::Release);
    }
}

impl<const HWN: usize> Default for FamilyB<HWN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const HWN: usize> NicFamily for FamilyB<HWN> {
    fn setup(&mut self) {
        for i in 0..HWN {
            let chain = if i == HWN - 1 { Self::RX_CHAIN } else { 0 };
            self.rx_cntl[i].store(chain, Ordering::Relaxed);
            self.tx_cntl[i].store(if i == HWN - 1 { Self::TX_CHAIN } else { 0 }, Ordering::Relaxed);
        }
    }

    fn refill_rx_slot(&self, idx: usize, phys: Phys) {
        self.rx_addr[idx].store(phys.0 as u32, Ordering::Relaxed);
        self.rx_status[idx].store(Self::OWN_DMA, Ordering::Release);
    }

    fn is_rx_slot_owned_by_dma(&self, idx: usize) -> bool {
        self.rx_status[idx].load(Ordering::Acquire) & Self::OWN_DMA != 0
    }

    fn rx_slot_len(&self, idx: usize) -> u32 {
        self.rx_status[idx].load(Ordering::Acquire) & 0x7fff
    }

    fn send_tx_slot(&self, idx: usize, phys: Phys, len: u32) {
        let chain = if idx == HWN - 1 { Self::TX_CHAIN } else { 0 };
        self.tx_addr[idx].store(phys.0 as u32, Ordering::Relaxed);
        self.tx_cntl[idx].store(chain | Self::TX_FIRST | Self::TX_LAST | Self::TX_INT | (len & 0x7fff), Ordering::Relaxed);
        self.tx_status[idx].store(Self::OWN_DMA, Ordering::Release);
    }

    fn is_tx_slot_owned_by_dma(&self, idx: usize) -> bool {
        self.tx_status[idx].load(Ordering::Acquire) & Self::OWN_DMA != 0
    }

    fn irq_bits(&self) -> IrqBits {
        IrqBits::from_bits_truncate(self.irq.swap(0, Ordering::AcqRel))
    }
}
