//! RX mux: classifies frames arriving from the NIC driver by destination MAC
//! and fans them out to the matching client's used ring, then recycles each
//! client's freed buffers back to the driver.
//!
//! This crate is host-testable: [`RxMux`] takes its rings, memory access, and
//! cache operations as arguments rather than reaching for globals, so the
//! same logic runs against a `FakeRuntime`-backed harness in tests and
//! against real shared memory in `src/main.rs`.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use fixedmap::FixedMap;
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_abi::{ClientId, MacAddr};
use sddf_cache::{CacheOps, Range};
use sddf_net_proto::{EthernetHeader, ETHERNET_HEADER_LEN};
use sddf_pool::{AddressSpace, PeerVirt, PoolView};
use sddf_ring::{Descriptor, RingPair};
use sddf_rt::Halt;
use zerocopy::FromBytes;

/// Read access to the driver's buffer pool, as mapped into the RX mux's own
/// address space. The mux only ever reads the leading Ethernet header of a
/// buffer; it never copies a whole frame (that is the copy shim's job).
pub trait RxMemory {
    fn read(&self, addr: PeerVirt, len: usize) -> &[u8];
}

/// Who receives a frame sent to the broadcast address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BroadcastPolicy {
    DesignatedClient(ClientId),
    /// Delivers to the lowest-indexed client with room on its used ring.
    /// True replication to every client would require copying the frame
    /// into each client's own buffer, which this mux does not have the
    /// machinery to do (that is a copy-shim concern); delivering to one
    /// recipient at a time keeps the no-aliasing invariant intact.
    ReplicateToAll,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MuxOutcome {
    pub delivered: u32,
    pub dropped: u32,
    pub recycled: u32,
    pub notify_driver_free: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum RxMuxEvent {
    Delivered { client: ClientId },
    Dropped { client: Option<ClientId> },
    Recycled { n: u32 },
}

counted_ringbuf!(RxMuxEvent, 32, RxMuxEvent::Recycled { n: 0 });

/// `C` is the number of configured clients; `N` is every ring's wire
/// capacity (see `sddf_ring::CAPACITY`).
pub struct RxMux<'a, const N: usize, const C: usize> {
    driver: RingPair<'a, N>,
    clients: [RingPair<'a, N>; C],
    mac_table: FixedMap<MacAddr, ClientId, C>,
    broadcast: BroadcastPolicy,
    pool_views: [PoolView; C],
}

impl<'a, const N: usize, const C: usize> RxMux<'a, N, C> {
    pub fn new(
        driver: RingPair<'a, N>,
        clients: [RingPair<'a, N>; C],
        mac_table: FixedMap<MacAddr, ClientId, C>,
        broadcast: BroadcastPolicy,
        pool_views: [PoolView; C],
    ) -> Self {
        RxMux {
            driver,
            clients,
            mac_table,
            broadcast,
            pool_views,
        }
    }

    fn classify(&self, dst: MacAddr) -> Option<ClientId> {
        if dst.is_broadcast() {
            return match self.broadcast {
                BroadcastPolicy::DesignatedClient(c) => Some(c),
                BroadcastPolicy::ReplicateToAll => (0..C as u8)
                    .map(ClientId)
                    .find(|c| !self.clients[c.0 as usize].used.is_full()),
            };
        }
        self.mac_table.get(dst)
    }

    /// Drains the driver's used ring: classifies each frame by destination
    /// MAC and either delivers it to the matching client's used ring or
    /// returns it directly to the driver's free ring.
    pub fn handle_driver_notification(&mut self, mem: &impl RxMemory, cache: &impl CacheOps) -> MuxOutcome {
        let mut outcome = MuxOutcome::default();

        while let Ok(peeked) = self.driver.used.peek() {
            let addr: PeerVirt = peeked.addr();
            let dst = read_dst_mac(mem, addr, peeked.len);
            let target = self.classify(dst);

            let has_room = match target {
                Some(cid) => !self.clients[cid.0 as usize].used.is_full(),
                None => false,
            };
            if !has_room && self.driver.free.is_full() {
                break;
            }

            let d = self.driver.used.dequeue().expect("peek confirmed non-empty");
            match target {
                Some(cid) if has_room => {
                    cache.invalidate(Range::new(addr.0, d.len));
                    self.clients[cid.0 as usize]
                        .used
                        .enqueue(d)
                        .expect("checked not full above");
                    outcome.delivered += 1;
                    ringbuf_entry!(RxMuxEvent::Delivered { client: cid });
                }
                _ => {
                    self.driver.free.enqueue(d).expect("checked not full above");
                    outcome.dropped += 1;
                    ringbuf_entry!(RxMuxEvent::Dropped { client: target });
                }
            }
        }

        if self.driver.used.is_empty() {
            self.driver.used.request_reader_notify();
        } else {
            self.driver.used.clear_reader_notify();
        }
        if self.driver.free.is_empty() {
            self.driver.free.request_reader_notify();
        } else {
            self.driver.free.clear_reader_notify();
        }

        outcome
    }

    /// Drains one client's free ring into the driver's free ring. The driver
    /// itself translates peer-virtual addresses to physical on refill (it
    /// holds its own `rx_to_phys` map), so the descriptor is forwarded
    /// unchanged here; this only validates that the address actually falls
    /// within the client's pool before trusting it onto the driver's ring.
    pub fn handle_client_free_notification(&mut self, client: ClientId) -> Result<MuxOutcome, Halt> {
        let mut outcome = MuxOutcome::default();
        let idx = client.0 as usize;

        while !self.clients[idx].free.is_empty() && !self.driver.free.is_full() {
            let d = self.clients[idx].free.dequeue().expect("checked non-empty above");
            let peer_addr: PeerVirt = d.addr();
            self.pool_views[idx]
                .peer_to_own(peer_addr)
                .map_err(|_| Halt::PoolAddressOutOfRange)?;
            self.driver.free.enqueue(d).expect("checked not full above");
            outcome.recycled += 1;
        }

        if outcome.recycled > 0 {
            ringbuf_entry!(RxMuxEvent::Recycled { n: outcome.recycled });
        }

        if self.driver.free.is_empty() {
            self.driver.free.request_reader_notify();
        } else {
            self.driver.free.clear_reader_notify();
        }
        if self.driver.free.is_full() {
            self.clients[idx].free.clear_reader_notify();
        } else {
            self.clients[idx].free.request_reader_notify();
        }

        outcome.notify_driver_free = outcome.recycled > 0 && self.driver.free.reader_notify_requested();
        Ok(outcome)
    }

    /// Checked after every simulated event in tests: either each client's
    /// used ring is empty or it has a wake-up armed, and either the driver's
    /// free ring is empty or a wake-up is armed on it.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        debug_assert!(self.driver.free.is_empty() || self.driver.free.reader_notify_requested());
        for c in &self.clients {
            debug_assert!(c.used.is_empty() || c.used.reader_notify_requested() || !c.used.is_full());
        }
    }
}

fn read_dst_mac(mem: &impl RxMemory, addr: PeerVirt, len: u32) -> MacAddr {
    let bytes = mem.read(addr, len as usize);
    if bytes.len() < ETHERNET_HEADER_LEN {
        return MacAddr::ZERO;
    }
    match EthernetHeader::read_from_bytes(&bytes[..ETHERNET_HEADER_LEN]) {
        Ok(header) => header.dst,
        Err(_) => MacAddr::ZERO,
    }
}
