//! The contract a networking client (an IP stack plus its application
//! sockets) must satisfy to plug into one RX/TX ring-pair pairing.
//!
//! This crate does not ship a real IP stack -- that remains an opaque
//! collaborator outside the core's scope -- but it codifies the interface
//! such a stack must implement, and provides [`LoopbackClient`], a minimal
//! reference implementation used only by tests to exercise RX/TX wiring
//! without depending on lwIP or smoltcp.

#![cfg_attr(not(test), no_std)]

use sddf_abi::Ipv4Addr;
use sddf_cache::CacheOps;
use sddf_pool::{AddressSpace, BufferPool, ProducerVirt};
use sddf_ring::{Descriptor, RingPair};

/// The five responsibilities a client must implement, per the client
/// interface specification: draining received frames, transmitting, backing
/// off under TX backpressure, and registering an IP address with the ARP
/// responder once one is known.
pub trait NetClient {
    /// Drains the RX used ring: for each packet, invalidates its cache
    /// lines, delivers it to the stack, and returns the buffer to the RX
    /// free ring. Returns the number of packets delivered.
    fn on_rx_ready<const N: usize>(
        &mut self,
        rx: &RingPair<'_, N>,
        buffer_capacity: u32,
        cache: &impl CacheOps,
    ) -> u32;

    /// Called when the TX free ring transitions from empty to non-empty;
    /// drains as much of the internal backlog as the free ring now permits.
    fn on_tx_free_ready<const N: usize>(&mut self, tx: &RingPair<'_, N>, cache: &impl CacheOps) -> u32;

    /// Attempts to send `payload` now. If the TX free ring has no buffer
    /// available, the payload is queued internally and a `notify_reader` is
    /// requested on the TX free ring so `on_tx_free_ready` is called once
    /// room appears.
    fn try_send<const N: usize>(&mut self, tx: &RingPair<'_, N>, payload: &[u8], cache: &impl CacheOps) -> bool;

    /// Registers `ip` as reachable at this client's MAC, via the ARP
    /// responder's `REG_IP` protected call. Conventionally invoked once after
    /// DHCP (or static configuration) has settled on an address.
    fn register_ip(&mut self, ip: Ipv4Addr);
}

/// A minimal reference client that reflects every received frame back out
/// byte-identically. Used only by integration tests to validate that RX and
/// TX wiring (mux, copy shim, rings) moves bytes correctly end to end,
/// without pulling in a TCP/IP stack. Never shipped as a production client.
pub struct LoopbackClient<const QDEPTH: usize> {
    pool: BufferPool,
    backlog: heapless::Deque<heapless::Vec<u8, { sddf_pool::BUFFER_SIZE }>, QDEPTH>,
    registered_ip: Option<Ipv4Addr>,
    pub delivered: u32,
}

impl<const QDEPTH: usize> LoopbackClient<QDEPTH> {
    pub fn new(pool: BufferPool) -> Self {
        LoopbackClient {
            pool,
            backlog: heapless::Deque::new(),
            registered_ip: None,
            delivered: 0,
        }
    }

    pub fn registered_ip(&self) -> Option<Ipv4Addr> {
        self.registered_ip
    }

    fn enqueue_or_backlog<const N: usize>(&mut self, tx: &RingPair<'_, N>, payload: &[u8], cache: &impl CacheOps) -> bool {
        let Ok(free) = tx.free.dequeue() else {
            tx.free.request_reader_notify();
            let mut buf = heapless::Vec::new();
            let _ = buf.extend_from_slice(payload);
            // A full backlog is the client's own bound, not a ring-substrate
            // error: the oldest queued payload is dropped to make room,
            // matching "no user-visible error unless the client's internal
            // queue grows beyond its own bound."
            if self.backlog.is_full() {
                self.backlog.pop_front();
            }
            let _ = self.backlog.push_back(buf);
            return false;
        };
        let addr: ProducerVirt = free.addr();
        if !self.pool.contains(addr) {
            // A peer handed back an address outside this client's own pool:
            // a protection violation, never a routine condition.
            panic!("TX free buffer outside client pool");
        }
        // Safety in a real target: `addr` is this client's own pool, mapped
        // read/write in its own address space; writing the payload here
        // stands in for that copy.
        cache.clean(sddf_cache::Range::new(addr.0, payload.len() as u32));
        tx.used
            .enqueue(Descriptor::new(addr, payload.len() as u32, free.cookie))
            .expect("dequeued from free, used ring has matching capacity");
        true
    }
}

impl<const QDEPTH: usize> NetClient for LoopbackClient<QDEPTH> {
    fn on_rx_ready<const N: usize>(&mut self, rx: &RingPair<'_, N>, buffer_capacity: u32, cache: &impl CacheOps) -> u32 {
        let mut n = 0;
        while let Ok(d) = rx.used.dequeue() {
            let addr: ProducerVirt = d.addr();
            cache.invalidate(sddf_cache::Range::new(addr.0, d.len));
            self.delivered += 1;
            n += 1;
            rx.free
                .enqueue(Descriptor::new(addr, buffer_capacity, d.cookie))
                .expect("returning a buffer this client just drained cannot overflow its own free ring");
        }
        n
    }

    fn on_tx_free_ready<const N: usize>(&mut self, tx: &RingPair<'_, N>, cache: &impl CacheOps) -> u32 {
        let mut n = 0;
        while !self.backlog.is_empty() && !tx.free.is_empty() {
            let payload = self.backlog.pop_front().expect("checked non-empty above");
            if self.enqueue_or_backlog(tx, &payload, cache) {
                n += 1;
            } else {
                break;
            }
        }
        n
    }

    fn try_send<const N: usize>(&mut self, tx: &RingPair<'_, N>, payload: &[u8], cache: &impl CacheOps) -> bool {
        if !self.backlog.is_empty() {
            // Preserve send order: new traffic queues behind whatever is
            // already backed up rather than jumping ahead of it.
            let mut buf = heapless::Vec::new();
            let _ = buf.extend_from_slice(payload);
            if self.backlog.is_full() {
                self.backlog.pop_front();
            }
            let _ = self.backlog.push_back(buf);
            return false;
        }
        self.enqueue_or_backlog(tx, payload, cache)
    }

    fn register_ip(&mut self, ip: Ipv4Addr) {
        self.registered_ip = Some(ip);
    }
}
