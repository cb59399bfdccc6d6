//! Thin event-loop wrapper around [`task_sddf_arp::ArpResponder`].
//!
//! Wiring a real deployment's generated ring placement and pool bounds is
//! board integration work this repository leaves open; the values below are
//! a representative single-registrant wiring.

#![no_std]
#![no_main]

use sddf_abi::ChannelId;
use sddf_cache::CoherentCacheOps;
use sddf_pool::{AddressMap, BufferPool, ProducerVirt};
use sddf_ring::{RingPair, RingStorage};
use sddf_rt::{recv, Event, EventSource, Halt, Notifier};
use task_sddf_arp::{ArpMemory, ArpResponder};

const RING_SIZE: u32 = 256;
const RX_POOL_BASE: u64 = 0x4000_0000;
const RX_PHYS_BASE: u64 = 0x9000_0000;
const TX_POOL_BASE: u64 = 0xa000_0000;

static RX_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static RX_USED: RingStorage<512> = RingStorage::new(RING_SIZE);
static TX_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static TX_USED: RingStorage<512> = RingStorage::new(RING_SIZE);

const RX_NOTIFY: ChannelId = ChannelId(0);

struct PoolMemory;

impl ArpMemory for PoolMemory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8] {
        // Safety: `addr` has already been validated as lying within the RX
        // pool mapped read-only into this task before this is reached.
        unsafe { core::slice::from_raw_parts(addr.0 as *const u8, len) }
    }
    fn write(&mut self, addr: ProducerVirt, data: &[u8]) {
        // Safety: `addr` has already been validated as lying within this
        // task's own TX pool, mapped read-write here.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), addr.0 as *mut u8, data.len());
        }
    }
}

#[export_name = "main"]
fn main() -> ! {
    let rx = RingPair::new(RX_FREE.ring(), RX_USED.ring());
    let tx = RingPair::new(TX_FREE.ring(), TX_USED.ring());

    let rx_pool = BufferPool::new(ProducerVirt(RX_POOL_BASE), sddf_pool::BUFFER_SIZE, sddf_pool::POOL_SLOTS);
    let to_peer = AddressMap::new(RX_POOL_BASE, RX_POOL_BASE, rx_pool.len_bytes());
    let to_phys = AddressMap::new(RX_POOL_BASE, RX_PHYS_BASE, rx_pool.len_bytes());
    let rx_pool_view = sddf_pool::PoolView::new(rx_pool, to_peer, to_phys);
    let tx_pool = BufferPool::new(ProducerVirt(TX_POOL_BASE), sddf_pool::BUFFER_SIZE, sddf_pool::POOL_SLOTS);

    let mut arp = ArpResponder::<512, 8>::new(rx, tx, rx_pool_view, tx_pool, sddf_pool::BUFFER_SIZE as u32);

    let mut rt = platform::Runtime::new();
    let mask = RX_NOTIFY.mask_bit();

    loop {
        recv(
            &mut rt,
            mask,
            &mut arp,
            |arp, bits| {
                if bits & RX_NOTIFY.mask_bit() != 0 {
                    // `outcome.notify_tx_used` tells a real deployment
                    // whether to signal the TX mux's driver-notify channel
                    // (delayed); wiring that through requires the runtime
                    // binding this module leaves to board integration.
                    if let Err(halt) = arp.handle_rx_notification(&CoherentCacheOps, &mut PoolMemory) {
                        platform::halt(halt);
                    }
                }
            },
            |arp, label, args| arp.handle_protected_call(label, args),
        );
        rt.flush_delayed();
    }
}

/// The boundary to this deployment's kernel: left unimplemented since the
/// syscall ABI is outside this repository's scope.
mod platform {
    use super::*;

    pub struct Runtime;

    impl Runtime {
        pub fn new() -> Self {
            Runtime
        }
    }

    impl Notifier for Runtime {
        fn notify(&mut self, _channel: ChannelId) {
            unimplemented!("board-specific kernel binding")
        }
        fn notify_delayed(&mut self, _channel: ChannelId) {
            unimplemented!("board-specific kernel binding")
        }
        fn flush_delayed(&mut self) {
            unimplemented!("board-specific kernel binding")
        }
    }

    impl EventSource for Runtime {
        fn wait(&mut self, _mask: u32) -> Event {
            unimplemented!("board-specific kernel binding")
        }
    }

    pub fn halt(reason: Halt) -> ! {
        panic!("sddf-arp halted: {reason:?}");
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
