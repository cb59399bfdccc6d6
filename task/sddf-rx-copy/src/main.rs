//! Thin event-loop wrapper around [`task_sddf_rx_copy::RxCopy`].
//!
//! Wiring a real deployment's generated ring placement and pool bounds is
//! board integration work this repository leaves open; the values below are
//! a representative single-client wiring.

#![no_std]
#![no_main]

use sddf_abi::ChannelId;
use sddf_cache::CoherentCacheOps;
use sddf_copy_shim::{DestMemory, SourceMemory};
use sddf_pool::{BufferPool, ProducerVirt};
use sddf_ring::{RingPair, RingStorage};
use sddf_rt::{recv, Event, EventSource, Halt, Notifier};
use task_sddf_rx_copy::RxCopy;

const RING_SIZE: u32 = 256;
const CLIENT_POOL_BASE: u64 = 0x4000_0000;

static UP_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static UP_USED: RingStorage<512> = RingStorage::new(RING_SIZE);
static DOWN_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static DOWN_USED: RingStorage<512> = RingStorage::new(RING_SIZE);

const MUX_NOTIFY: ChannelId = ChannelId(0);
const CLIENT_NOTIFY: ChannelId = ChannelId(1);

struct PoolMemory;

impl SourceMemory for PoolMemory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8] {
        // Safety: `addr` has already been validated as lying within the
        // upstream pool by the caller before this is reached.
        unsafe { core::slice::from_raw_parts(addr.0 as *const u8, len) }
    }
}

impl DestMemory for PoolMemory {
    fn write(&mut self, addr: ProducerVirt, data: &[u8]) {
        // Safety: `addr` has already been validated as lying within this
        // client's own pool by `run_once`'s bounds check before this is
        // reached; the pool's backing storage is mapped read-write here.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), addr.0 as *mut u8, data.len());
        }
    }
}

#[export_name = "main"]
fn main() -> ! {
    let upstream = RingPair::new(UP_FREE.ring(), UP_USED.ring());
    let downstream = RingPair::new(DOWN_FREE.ring(), DOWN_USED.ring());
    let downstream_pool = BufferPool::new(ProducerVirt(CLIENT_POOL_BASE), sddf_pool::BUFFER_SIZE, sddf_pool::POOL_SLOTS);

    let mut copy = RxCopy::<512>::new(upstream, downstream, downstream_pool, sddf_pool::BUFFER_SIZE as u32);

    let mut rt = platform::Runtime::new();
    let mask = MUX_NOTIFY.mask_bit() | CLIENT_NOTIFY.mask_bit();

    loop {
        recv(
            &mut rt,
            mask,
            &mut copy,
            |copy, _bits| {
                // Two separate zero-sized handles, not one shared borrow:
                // `PoolMemory` carries no state of its own (everything it
                // touches is raw pool memory elsewhere), so the source and
                // destination roles don't actually alias the same Rust value.
                if let Err(halt) = copy.handle_notification(&CoherentCacheOps, &PoolMemory, &mut PoolMemory) {
                    platform::halt(halt);
                }
            },
            |_copy, _label, _args| [0, 0],
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
        panic!("sddf-rx-copy halted: {reason:?}");
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
