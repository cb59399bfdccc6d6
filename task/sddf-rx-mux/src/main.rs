//! Thin event-loop wrapper around [`task_sddf_rx_mux::RxMux`].
//!
//! This deployment's ring placement, client count, MAC table, and broadcast
//! policy are all build-time facts (see `sddf-net-config`); wiring a real
//! deployment's generated constants in here is board-integration work this
//! repository leaves open (the kernel ABI itself is out of scope), so the
//! values below are a representative two-client wiring rather than generated
//! output.

#![no_std]
#![no_main]

use sddf_abi::{ChannelId, ClientId, MacAddr};
use sddf_cache::CoherentCacheOps;
use sddf_pool::{AddressMap, BufferPool, PeerVirt, PoolView, ProducerVirt};
use sddf_ring::{RingPair, RingStorage};
use sddf_rt::{recv, Event, EventSource, Halt, Notifier};
use task_sddf_rx_mux::{BroadcastPolicy, RxMemory, RxMux};

const NUM_CLIENTS: usize = 2;
const RING_SIZE: u32 = 256;

const DRIVER_FREE_BASE: u64 = 0x3000_0000;
const DRIVER_PHYS_BASE: u64 = 0x9000_0000;
const CLIENT_PEER_BASES: [u64; NUM_CLIENTS] = [0x6000_0000, 0x6100_0000];

static DRIVER_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static DRIVER_USED: RingStorage<512> = RingStorage::new(RING_SIZE);
static CLIENT_FREE: [RingStorage<512>; NUM_CLIENTS] = [RingStorage::new(RING_SIZE), RingStorage::new(RING_SIZE)];
static CLIENT_USED: [RingStorage<512>; NUM_CLIENTS] = [RingStorage::new(RING_SIZE), RingStorage::new(RING_SIZE)];

const DRIVER_NOTIFY: ChannelId = ChannelId(0);
const CLIENT_NOTIFY: [ChannelId; NUM_CLIENTS] = [ChannelId(1), ChannelId(2)];

struct PoolMemory;

impl RxMemory for PoolMemory {
    fn read(&self, addr: PeerVirt, len: usize) -> &[u8] {
        // Safety: `addr` has already been validated by the caller as lying
        // within the driver's pool before this is reached; the pool's
        // backing storage is mapped read-only into this task.
        unsafe { core::slice::from_raw_parts(addr.0 as *const u8, len) }
    }
}

fn build_mac_table() -> fixedmap::FixedMap<MacAddr, ClientId, NUM_CLIENTS> {
    let mut table = fixedmap::FixedMap::default();
    table.insert(MacAddr([0x52, 0x54, 0x01, 0x00, 0x00, 0x01]), ClientId(0));
    table.insert(MacAddr([0x52, 0x54, 0x01, 0x00, 0x00, 0x02]), ClientId(1));
    table
}

fn build_pool_views() -> [PoolView; NUM_CLIENTS] {
    core::array::from_fn(|i| {
        let pool = BufferPool::new(ProducerVirt(DRIVER_FREE_BASE), sddf_pool::BUFFER_SIZE, sddf_pool::POOL_SLOTS);
        let to_peer = AddressMap::new(DRIVER_FREE_BASE, CLIENT_PEER_BASES[i], pool.len_bytes());
        let to_phys = AddressMap::new(DRIVER_FREE_BASE, DRIVER_PHYS_BASE, pool.len_bytes());
        PoolView::new(pool, to_peer, to_phys)
    })
}

#[export_name = "main"]
fn main() -> ! {
    let driver = RingPair::new(DRIVER_FREE.ring(), DRIVER_USED.ring());
    let clients = core::array::from_fn(|i| RingPair::new(CLIENT_FREE[i].ring(), CLIENT_USED[i].ring()));

    let mut mux = RxMux::<512, NUM_CLIENTS>::new(
        driver,
        clients,
        build_mac_table(),
        BroadcastPolicy::DesignatedClient(ClientId(0)),
        build_pool_views(),
    );

    let mut rt = platform::Runtime::new();
    let mask = DRIVER_NOTIFY.mask_bit() | CLIENT_NOTIFY.iter().fold(0, |m, c| m | c.mask_bit());

    loop {
        recv(
            &mut rt,
            mask,
            &mut mux,
            |mux, bits| {
                if bits & DRIVER_NOTIFY.mask_bit() != 0 {
                    mux.handle_driver_notification(&PoolMemory, &CoherentCacheOps);
                }
                for (i, ch) in CLIENT_NOTIFY.iter().enumerate() {
                    if bits & ch.mask_bit() != 0 {
                        if let Err(halt) = mux.handle_client_free_notification(ClientId(i as u8)) {
                            platform::halt(halt);
                        }
                    }
                }
            },
            |_mux, _label, _args| [0, 0],
        );
        rt.flush_delayed();
    }
}

/// The boundary to this deployment's kernel: a concrete `Notifier` +
/// `EventSource` implementation. Left unimplemented here since the syscall
/// ABI is outside this repository's scope; a board integration links one in.
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
        panic!("sddf-rx-mux halted: {reason:?}");
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
