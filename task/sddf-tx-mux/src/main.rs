//! Thin event-loop wrapper around [`task_sddf_tx_mux::TxMux`].
//!
//! As with `sddf-rx-mux`, this deployment's ring placement, client count,
//! and TX policy selection are build-time facts (see `sddf-net-config`);
//! wiring a real deployment's generated constants in here is board
//! integration work this repository leaves open, so the values below are a
//! representative two-client strict-priority wiring rather than generated
//! output.

#![no_std]
#![no_main]

use sddf_abi::{ChannelId, ClientId};
use sddf_pool::{AddressMap, BufferPool, PoolView, ProducerVirt};
use sddf_ring::{RingPair, RingStorage};
use sddf_rt::{recv, Event, EventSource, Halt, Notifier};
use sddf_timer_api::{Instant, TimerApi};
use sddf_tx_policy::StrictPriority;
use task_sddf_tx_mux::{TxMux, TxPolicy};

const NUM_CLIENTS: usize = 2;
const RING_SIZE: u32 = 256;

const CLIENT_OWN_BASES: [u64; NUM_CLIENTS] = [0x4000_0000, 0x4100_0000];
const CLIENT_PHYS_BASES: [u64; NUM_CLIENTS] = [0x9000_0000, 0x9100_0000];

static DRIVER_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static DRIVER_USED: RingStorage<512> = RingStorage::new(RING_SIZE);
static CLIENT_FREE: [RingStorage<512>; NUM_CLIENTS] = [RingStorage::new(RING_SIZE), RingStorage::new(RING_SIZE)];
static CLIENT_USED: [RingStorage<512>; NUM_CLIENTS] = [RingStorage::new(RING_SIZE), RingStorage::new(RING_SIZE)];
static STAGING: [RingStorage<512>; NUM_CLIENTS] = [RingStorage::new(RING_SIZE), RingStorage::new(RING_SIZE)];

const DRIVER_NOTIFY: ChannelId = ChannelId(0);
const TIMER_NOTIFY: ChannelId = ChannelId(1);
const CLIENT_NOTIFY: [ChannelId; NUM_CLIENTS] = [ChannelId(2), ChannelId(3)];

fn build_pool_views() -> [PoolView; NUM_CLIENTS] {
    core::array::from_fn(|i| {
        let pool = BufferPool::new(ProducerVirt(CLIENT_OWN_BASES[i]), sddf_pool::BUFFER_SIZE, sddf_pool::POOL_SLOTS);
        let to_peer = AddressMap::new(CLIENT_OWN_BASES[i], CLIENT_OWN_BASES[i], pool.len_bytes());
        let to_phys = AddressMap::new(CLIENT_OWN_BASES[i], CLIENT_PHYS_BASES[i], pool.len_bytes());
        PoolView::new(pool, to_peer, to_phys)
    })
}

#[export_name = "main"]
fn main() -> ! {
    let driver = RingPair::new(DRIVER_FREE.ring(), DRIVER_USED.ring());
    let clients = core::array::from_fn(|i| RingPair::new(CLIENT_FREE[i].ring(), CLIENT_USED[i].ring()));
    let staging = core::array::from_fn(|i| STAGING[i].ring());

    let mut mux = TxMux::<512, NUM_CLIENTS>::new(
        driver,
        clients,
        staging,
        build_pool_views(),
        TxPolicy::Strict(StrictPriority::new([0, 1])),
    );

    let mut rt = platform::Runtime::new();
    let mut timer = platform::HardwareTimer::new();
    let mask = DRIVER_NOTIFY.mask_bit() | TIMER_NOTIFY.mask_bit() | CLIENT_NOTIFY.iter().fold(0, |m, c| m | c.mask_bit());

    loop {
        recv(
            &mut rt,
            mask,
            &mut mux,
            |mux, bits| {
                for (i, ch) in CLIENT_NOTIFY.iter().enumerate() {
                    if bits & ch.mask_bit() != 0 {
                        if let Err(halt) = mux.handle_client_send_notification(ClientId(i as u8)) {
                            platform::halt(halt);
                        }
                    }
                }
                if bits & DRIVER_NOTIFY.mask_bit() != 0 {
                    if let Err(halt) = mux.handle_driver_complete_notification() {
                        platform::halt(halt);
                    }
                }
                if bits & TIMER_NOTIFY.mask_bit() != 0 {
                    mux.handle_timer_notification(&mut timer);
                }
                mux.service_policy(&mut timer);
            },
            |_mux, _label, _args| [0, 0],
        );
        rt.flush_delayed();
    }
}

/// The boundary to this deployment's kernel and timer collaborator: left
/// unimplemented since the syscall ABI is outside this repository's scope.
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

    pub struct HardwareTimer;

    impl HardwareTimer {
        pub fn new() -> Self {
            HardwareTimer
        }
    }

    impl TimerApi for HardwareTimer {
        fn get_time(&self) -> Instant {
            unimplemented!("board-specific timer binding")
        }
        fn set_timeout(&mut self, _rel_us: u64) {
            unimplemented!("board-specific timer binding")
        }
    }

    pub fn halt(reason: Halt) -> ! {
        panic!("sddf-tx-mux halted: {reason:?}");
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
