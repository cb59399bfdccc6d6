//! NIC driver task: owns the hardware descriptor rings through
//! [`drv_sddf_nic::Driver`] and the two adjacent ring pairs (RX, toward the
//! RX mux, and TX, toward the TX mux), and turns the three events a real
//! board delivers -- an IRQ, a client handing back RX buffers, a mux handing
//! over TX frames -- into calls on that driver.
//!
//! Everything that depends on a specific chip (register layout, PHY
//! bring-up, interrupt acknowledgement) stays behind the [`NicFamily`]
//! boundary `drv-sddf-nic` already draws; this crate only adds the
//! ring-pair bookkeeping and notification glue a task binary needs around
//! it.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use drv_sddf_nic::{DriverError, HandlerOutcome, NicFamily};
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_ring::RingPair;
use sddf_rt::Halt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum NicDriverEvent {
    Irq { rx_completed: bool, tx_completed: bool },
    Refilled,
    Sent,
    BusError,
    LostDescriptor,
}

counted_ringbuf!(NicDriverEvent, 32, NicDriverEvent::Refilled);

fn map_driver_error(e: DriverError) -> Halt {
    match e {
        DriverError::BusError => {
            ringbuf_entry!(NicDriverEvent::BusError);
            Halt::BusError
        }
        DriverError::LostDescriptor => {
            ringbuf_entry!(NicDriverEvent::LostDescriptor);
            Halt::LostDescriptor
        }
    }
}

/// `N` is every shared ring's wire capacity; `HWN` is the hardware
/// descriptor ring's length, which is independent of `N` and usually much
/// smaller.
pub struct NicDriverTask<'a, F: NicFamily, const HWN: usize, const N: usize> {
    driver: drv_sddf_nic::Driver<F, HWN>,
    rx: RingPair<'a, N>,
    tx: RingPair<'a, N>,
    buffer_capacity: u32,
}

impl<'a, F: NicFamily, const HWN: usize, const N: usize> NicDriverTask<'a, F, HWN, N> {
    pub fn new(driver: drv_sddf_nic::Driver<F, HWN>, rx: RingPair<'a, N>, tx: RingPair<'a, N>, buffer_capacity: u32) -> Self {
        NicDriverTask { driver, rx, tx, buffer_capacity }
    }

    /// Drains the IRQ register: TX-complete, then RX-complete, then RX
    /// refill, in that sequence, per the IRQ handler's specified order.
    pub fn handle_irq(&mut self) -> Result<HandlerOutcome, Halt> {
        let outcome = self
            .driver
            .handle_irq(&self.rx.free, &self.rx.used, &self.tx.used, &self.tx.free, self.buffer_capacity)
            .map_err(map_driver_error)?;
        ringbuf_entry!(NicDriverEvent::Irq {
            rx_completed: outcome.woke_downstream,
            tx_completed: outcome.woke_upstream,
        });
        Ok(outcome)
    }

    /// The RX mux returned buffers to the upstream free ring; try to install
    /// them into the hardware ring right away rather than waiting for the
    /// next IRQ.
    pub fn handle_rx_free_notification(&mut self) -> HandlerOutcome {
        let outcome = self.driver.refill_rx(&self.rx.free);
        ringbuf_entry!(NicDriverEvent::Refilled);
        outcome
    }

    /// The TX mux admitted new frames onto the upstream used ring; install
    /// as many as the hardware ring has room for.
    pub fn handle_tx_used_notification(&mut self) -> HandlerOutcome {
        let outcome = self.driver.send_tx(&self.tx.used);
        ringbuf_entry!(NicDriverEvent::Sent);
        outcome
    }
}
