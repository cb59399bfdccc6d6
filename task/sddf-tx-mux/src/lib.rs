//! TX mux: admits each client's outgoing frames into a per-client staging
//! ring translated to physical addresses, schedules the driver-facing used
//! ring from those staging rings under a configured policy, and routes
//! completed buffers back to whichever client originally sent them.
//!
//! The driver's TX rings carry physical addresses with no translation of its
//! own (unlike RX, where the driver holds its own `rx_to_phys` map) -- see
//! `drv_sddf_nic::Driver::send_tx`'s doc comment. That means this mux, not
//! the driver, is the only place address translation happens for TX, and it
//! has to happen before [`sddf_tx_policy`]'s scheduler ever sees a
//! descriptor: that crate's `service` moves descriptors between rings
//! unchanged. The staging rings are exactly that translation point --
//! private, mux-owned rings holding already-physical descriptors, so the
//! policy crate itself never needs to know about address spaces at all.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_abi::ClientId;
use sddf_pool::PoolView;
use sddf_ring::{Descriptor, Ring, RingPair};
use sddf_rt::Halt;
use sddf_timer_api::TimerApi;
use sddf_tx_policy::{BandwidthLimited, PolicyOutcome, StrictPriority};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AdmitOutcome {
    pub admitted: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CompleteOutcome {
    pub completed: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum TxMuxEvent {
    Admitted { client: ClientId },
    AdmitRejected { client: ClientId },
    Sent { n: u32 },
    Completed { client: ClientId },
    CompletionUnowned,
}

counted_ringbuf!(TxMuxEvent, 32, TxMuxEvent::Sent { n: 0 });

/// Either of the two scheduling disciplines `sddf-tx-policy` offers, chosen
/// once at startup from that deployment's `TxPolicyConfig`.
pub enum TxPolicy<const C: usize> {
    Strict(StrictPriority<C>),
    Bandwidth(BandwidthLimited<C>),
}

impl<const C: usize> TxPolicy<C> {
    fn service<const N: usize>(
        &mut self,
        staging: &[Ring<'_, N>; C],
        driver_used: &Ring<'_, N>,
        timer: &mut impl TimerApi,
    ) -> PolicyOutcome {
        match self {
            TxPolicy::Strict(p) => p.service(staging, driver_used),
            TxPolicy::Bandwidth(p) => p.service(staging, driver_used, timer),
        }
    }

    fn on_timer_fired<const N: usize>(&mut self, staging: &[Ring<'_, N>; C], timer: &mut impl TimerApi) {
        if let TxPolicy::Bandwidth(p) = self {
            p.on_timer_fired(staging, timer);
        }
    }
}

/// `C` is the number of configured clients; `N` is every ring's wire
/// capacity (see `sddf_ring::CAPACITY`).
pub struct TxMux<'a, const N: usize, const C: usize> {
    driver: RingPair<'a, N>,
    clients: [RingPair<'a, N>; C],
    staging: [Ring<'a, N>; C],
    pool_views: [PoolView; C],
    policy: TxPolicy<C>,
}

impl<'a, const N: usize, const C: usize> TxMux<'a, N, C> {
    pub fn new(
        driver: RingPair<'a, N>,
        clients: [RingPair<'a, N>; C],
        staging: [Ring<'a, N>; C],
        pool_views: [PoolView; C],
        policy: TxPolicy<C>,
    ) -> Self {
        TxMux {
            driver,
            clients,
            staging,
            pool_views,
            policy,
        }
    }

    /// Drains one client's outgoing-frame ring into its staging ring,
    /// translating each address from that client's own namespace to
    /// physical. Stops once the staging ring is full rather than dropping: a
    /// client's own frame backlog is bounded by its own ring capacity, and
    /// nothing downstream of the staging ring is allowed to silently lose a
    /// frame the client already committed to sending.
    pub fn handle_client_send_notification(&mut self, client: ClientId) -> Result<AdmitOutcome, Halt> {
        let mut outcome = AdmitOutcome::default();
        let idx = client.0 as usize;

        while !self.clients[idx].used.is_empty() && !self.staging[idx].is_full() {
            let d = self.clients[idx].used.peek().expect("checked non-empty above");
            let phys = match self.pool_views[idx].own_to_phys(d.addr()) {
                Ok(phys) => phys,
                Err(_) => {
                    ringbuf_entry!(TxMuxEvent::AdmitRejected { client });
                    return Err(Halt::PoolAddressOutOfRange);
                }
            };
            self.clients[idx].used.dequeue().expect("peek confirmed non-empty");
            self.staging[idx]
                .enqueue(Descriptor::new(phys, d.len, d.cookie))
                .expect("checked not full above");
            outcome.admitted += 1;
            ringbuf_entry!(TxMuxEvent::Admitted { client });
        }

        // A non-empty ring here means admission stopped on a full staging
        // ring, not on a lack of work: the mux already knows about the
        // backlog (it will retry once `service_policy` frees staging space)
        // and does not need the client to interrupt it again for arrivals
        // it hasn't even gotten to yet.
        if self.clients[idx].used.is_empty() {
            self.clients[idx].used.request_reader_notify();
        } else {
            self.clients[idx].used.clear_reader_notify();
        }

        Ok(outcome)
    }

    /// Runs the configured scheduling policy over every client's staging
    /// ring, forwarding as many already-physical descriptors as the driver's
    /// used ring has room for.
    pub fn service_policy(&mut self, timer: &mut impl TimerApi) -> PolicyOutcome {
        let outcome = self.policy.service(&self.staging, &self.driver.used, timer);
        if outcome.sent > 0 {
            ringbuf_entry!(TxMuxEvent::Sent { n: outcome.sent });
        }
        outcome
    }

    /// Forwarded to the policy when the shared timer notification fires;
    /// a no-op under `StrictPriority`.
    pub fn handle_timer_notification(&mut self, timer: &mut impl TimerApi) {
        self.policy.on_timer_fired(&self.staging, timer);
    }

    /// Drains the driver's completed-buffer ring, translating each physical
    /// address back into whichever client's own namespace it belongs to and
    /// returning it on that client's free ring. Stops (rather than
    /// dropping) if the owning client's free ring is full: the buffer still
    /// belongs to that client and must eventually get back to it.
    pub fn handle_driver_complete_notification(&mut self) -> Result<CompleteOutcome, Halt> {
        let mut outcome = CompleteOutcome::default();

        while let Ok(peeked) = self.driver.free.peek() {
            let phys = peeked.addr();
            let owner = (0..C as u8)
                .map(ClientId)
                .find(|c| self.pool_views[c.0 as usize].phys_to_own(phys).is_ok());
            let Some(owner) = owner else {
                ringbuf_entry!(TxMuxEvent::CompletionUnowned);
                return Err(Halt::PoolAddressOutOfRange);
            };
            let idx = owner.0 as usize;
            if self.clients[idx].free.is_full() {
                break;
            }

            let d = self.driver.free.dequeue().expect("peek confirmed non-empty");
            let own = self.pool_views[idx]
                .phys_to_own(phys)
                .expect("ownership already confirmed above");
            self.clients[idx]
                .free
                .enqueue(Descriptor::new(own, d.len, d.cookie))
                .expect("checked not full above");
            outcome.completed += 1;
            ringbuf_entry!(TxMuxEvent::Completed { client: owner });
        }

        if self.driver.free.is_empty() {
            self.driver.free.request_reader_notify();
        } else {
            self.driver.free.clear_reader_notify();
        }

        Ok(outcome)
    }

    /// Checked after every simulated event in tests: staging rings never
    /// exceed the driver ring's capacity budget they feed, and every
    /// non-empty ring this mux reads from has a wake-up armed or is full.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        debug_assert!(self.driver.free.is_empty() || self.driver.free.reader_notify_requested());
        for c in &self.clients {
            debug_assert!(c.used.is_empty() || c.used.reader_notify_requested() || !c.used.is_full());
        }
    }
}
