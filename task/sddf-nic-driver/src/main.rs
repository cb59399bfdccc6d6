//! Thin event-loop wrapper around [`task_sddf_nic_driver::NicDriverTask`].
//!
//! As with the other task binaries, the ring placement and channel wiring
//! below are a representative single-board configuration rather than
//! generated output; the kernel ABI and hardware bring-up (`FamilyA::setup`)
//! are board-integration work this repository leaves open.

#![no_std]
#![no_main]

use drv_sddf_nic::FamilyA;
use sddf_abi::ChannelId;
use sddf_pool::AddressMap;
use sddf_ring::{RingPair, RingStorage};
use sddf_rt::{recv, Event, EventSource, Halt, Notifier};
use task_sddf_nic_driver::NicDriverTask;

const RING_SIZE: u32 = 256;
const HW_RING_LEN: usize = 64;
const BUFFER_CAPACITY: u32 = 2048;

const RX_FREE_BASE: u64 = 0x3000_0000;
const RX_PHYS_BASE: u64 = 0x9000_0000;

static RX_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static RX_USED: RingStorage<512> = RingStorage::new(RING_SIZE);
static TX_FREE: RingStorage<512> = RingStorage::new(RING_SIZE);
static TX_USED: RingStorage<512> = RingStorage::new(RING_SIZE);

const IRQ_NOTIFY: ChannelId = ChannelId(0);
const RX_FREE_NOTIFY: ChannelId = ChannelId(1);
const TX_USED_NOTIFY: ChannelId = ChannelId(2);

#[export_name = "main"]
fn main() -> ! {
    let family: FamilyA<HW_RING_LEN> = FamilyA::new();
    let rx_to_phys = AddressMap::new(RX_FREE_BASE, RX_PHYS_BASE, (RING_SIZE as u64) * sddf_pool::BUFFER_SIZE as u64);
    // `Driver::new` calls `family.setup()` itself.
    let driver = drv_sddf_nic::Driver::new(family, rx_to_phys);

    let rx = RingPair::new(RX_FREE.ring(), RX_USED.ring());
    let tx = RingPair::new(TX_FREE.ring(), TX_USED.ring());
    let mut task = NicDriverTask::<FamilyA<HW_RING_LEN>, HW_RING_LEN, 512>::new(driver, rx, tx, BUFFER_CAPACITY);

    let mut rt = platform::Runtime::new();
    let mask = IRQ_NOTIFY.mask_bit() | RX_FREE_NOTIFY.mask_bit() | TX_USED_NOTIFY.mask_bit();

    loop {
        recv(
            &mut rt,
            mask,
            &mut task,
            |task, bits| {
                if bits & IRQ_NOTIFY.mask_bit() != 0 {
                    if let Err(halt) = task.handle_irq() {
                        platform::halt(halt);
                    }
                }
                if bits & RX_FREE_NOTIFY.mask_bit() != 0 {
                    task.handle_rx_free_notification();
                }
                if bits & TX_USED_NOTIFY.mask_bit() != 0 {
                    task.handle_tx_used_notification();
                }
            },
            |_task, _label, _args| [0, 0],
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
        panic!("sddf-nic-driver halted: {reason:?}");
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
