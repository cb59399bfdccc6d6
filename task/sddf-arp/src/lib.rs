//! ARP responder: a degenerate networking client that only ever sees ARP
//! traffic. It consumes frames delivered by the RX mux, answers "who-has"
//! requests for any IP address registered with it by a protected call, and
//! emits replies through the TX mux. Unlike a real client it has no lwIP
//! stack behind it and needs none: the whole responsibility is a table
//! lookup and a fixed wire-format synthesis.
//!
//! Host-testable for the same reason every other data-plane crate here is:
//! rings, memory access, and cache operations are all taken as arguments.

#![cfg_attr(not(test), no_std)]

use counters::Count;
use fixedmap::FixedMap;
use ringbuf::{counted_ringbuf, ringbuf_entry};
use sddf_abi::{ClientId, Ipv4Addr, MacAddr};
use sddf_cache::{CacheOps, Range};
use sddf_net_proto::{
    ArpFrame, ArpOpcode, ArpPayload, EthernetHeader, ARP_FRAME_LEN, ARP_PAYLOAD_LEN, ETHERNET_HEADER_LEN,
    ETHERTYPE_ARP,
};
use sddf_pool::{AddressSpace, BufferPool, PeerVirt, PoolView, ProducerVirt};
use sddf_ring::{Descriptor, RingPair};
use sddf_rt::Halt;
use zerocopy::{FromBytes, IntoBytes};

/// Read/write access to the two pools the responder touches: the RX pool
/// shared with the mux (read-only, frames it did not produce) and its own TX
/// pool (read-write, replies it synthesises itself). One trait covers both
/// because a single call to [`ArpResponder::handle_rx_notification`] never
/// needs the two borrows live at once -- it reads a request, extracts the
/// owned fields it needs from the bytes, and only then writes a reply.
pub trait ArpMemory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8];
    fn write(&mut self, addr: ProducerVirt, data: &[u8]);
}

/// Protected-call opcode for registering an IP/MAC pair, carried in the low
/// byte of `label`; the high bytes carry the calling client's id. `ChannelId`
/// is local to a component's notification mask and cannot carry this, so the
/// label is partitioned instead -- this is a resolved Open Question, not an
/// assumption re-derived from the argument names (see DESIGN.md).
pub const REG_IP_OPCODE: u32 = 1;

fn decode_label(label: u32) -> (ClientId, u32) {
    (ClientId((label >> 8) as u8), label & 0xff)
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArpOutcome {
    pub processed: u32,
    pub replied: u32,
    pub dropped_not_arp_request: u32,
    pub dropped_lookup_miss: u32,
    pub dropped_tx_exhausted: u32,
    pub dropped_length_mismatch: u32,
    pub notify_rx_free: bool,
    pub notify_tx_used: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Count)]
pub enum ArpEvent {
    Replied { client: ClientId },
    DroppedLookupMiss,
    DroppedTxExhausted,
    DroppedLengthMismatch,
    Registered { client: ClientId },
}

counted_ringbuf!(ArpEvent, 32, ArpEvent::DroppedLookupMiss);

enum Classification {
    /// Not Ethernet/ARP, truncated, or an ARP opcode other than REQUEST.
    Uninteresting,
    Request { eth_src: MacAddr, request: ArpPayload },
}

fn classify(bytes: &[u8]) -> Classification {
    if bytes.len() < ETHERNET_HEADER_LEN + ARP_PAYLOAD_LEN {
        return Classification::Uninteresting;
    }
    let Ok(eth) = EthernetHeader::read_from_bytes(&bytes[..ETHERNET_HEADER_LEN]) else {
        return Classification::Uninteresting;
    };
    if eth.ethertype() != ETHERTYPE_ARP {
        return Classification::Uninteresting;
    }
    let Ok(arp) = ArpPayload::read_from_bytes(&bytes[ETHERNET_HEADER_LEN..ETHERNET_HEADER_LEN + ARP_PAYLOAD_LEN])
    else {
        return Classification::Uninteresting;
    };
    if !arp.is_ethernet_ipv4() || arp.opcode() != Some(ArpOpcode::Request) {
        return Classification::Uninteresting;
    }
    Classification::Request { eth_src: eth.src, request: arp }
}

/// `N` is every ring's wire capacity; `C` bounds the number of distinct
/// registered IP addresses.
pub struct ArpResponder<'a, const N: usize, const C: usize> {
    rx: RingPair<'a, N>,
    tx: RingPair<'a, N>,
    rx_pool_view: PoolView,
    tx_pool: BufferPool,
    buffer_capacity: u32,
    table: FixedMap<Ipv4Addr, (MacAddr, ClientId), C>,
}

impl<'a, const N: usize, const C: usize> ArpResponder<'a, N, C> {
    pub fn new(
        rx: RingPair<'a, N>,
        tx: RingPair<'a, N>,
        rx_pool_view: PoolView,
        tx_pool: BufferPool,
        buffer_capacity: u32,
    ) -> Self {
        ArpResponder {
            rx,
            tx,
            rx_pool_view,
            tx_pool,
            buffer_capacity,
            table: FixedMap::default(),
        }
    }

    /// Handles the `REG_IP` protected call: `args` are `(ip_addr, mac_lo32,
    /// mac_hi32)`, decoded exactly as the historical `protected()` handler
    /// this is descended from -- `mac_lo32`'s bytes become `mac[0..4]` and
    /// only the top two bytes of `mac_hi32` become `mac[4..6]`.
    pub fn handle_protected_call(&mut self, label: u32, args: [u32; 3]) -> [u32; 2] {
        let (client, opcode) = decode_label(label);
        if opcode == REG_IP_OPCODE {
            let ip = Ipv4Addr(args[0]);
            let mac = MacAddr::from_reg_ip_halves(args[1], args[2]);
            self.table.insert(ip, (mac, client));
            ringbuf_entry!(ArpEvent::Registered { client });
        }
        [0, 0]
    }

    /// Drains the RX mux's used ring: answers any ARP request whose target
    /// IP is registered, drops everything else without error, and always
    /// returns the consumed buffer to the RX free ring.
    pub fn handle_rx_notification(
        &mut self,
        cache: &impl CacheOps,
        mem: &mut impl ArpMemory,
    ) -> Result<ArpOutcome, Halt> {
        let mut outcome = ArpOutcome::default();

        while !self.rx.used.is_empty() && !self.rx.free.is_full() {
            let peeked = self.rx.used.peek().expect("checked non-empty above");
            let peer_addr: PeerVirt = peeked.addr();
            let own_addr = self
                .rx_pool_view
                .peer_to_own(peer_addr)
                .map_err(|_| Halt::PoolAddressOutOfRange)?;
            let d = self.rx.used.dequeue().expect("peek confirmed non-empty");
            outcome.processed += 1;

            cache.invalidate(Range::new(peer_addr.0, d.len));
            let bytes = mem.read(own_addr, d.len as usize);
            let classification = classify(bytes);

            match classification {
                Classification::Uninteresting => {
                    outcome.dropped_not_arp_request += 1;
                }
                Classification::Request { eth_src, request } => {
                    self.try_reply(eth_src, &request, cache, mem, &mut outcome)?;
                }
            }

            self.rx
                .free
                .enqueue(Descriptor::new(peer_addr, self.buffer_capacity, d.cookie))
                .expect("checked rx.free not full above");
        }

        if self.rx.used.is_empty() {
            self.rx.used.request_reader_notify();
        } else {
            self.rx.used.clear_reader_notify();
        }

        outcome.notify_rx_free = outcome.processed > 0 && self.rx.free.reader_notify_requested();
        outcome.notify_tx_used = outcome.replied > 0 && self.tx.used.reader_notify_requested();

        if self.tx.free.is_empty() {
            self.tx.free.request_reader_notify();
        } else {
            self.tx.free.clear_reader_notify();
        }

        Ok(outcome)
    }

    fn try_reply(
        &mut self,
        eth_src: MacAddr,
        request: &ArpPayload,
        cache: &impl CacheOps,
        mem: &mut impl ArpMemory,
        outcome: &mut ArpOutcome,
    ) -> Result<(), Halt> {
        let Some((registered_mac, owner)) = self.table.get(request.target_ip()) else {
            outcome.dropped_lookup_miss += 1;
            ringbuf_entry!(ArpEvent::DroppedLookupMiss);
            return Ok(());
        };

        if self.tx.free.is_empty() || self.tx.used.is_full() {
            outcome.dropped_tx_exhausted += 1;
            ringbuf_entry!(ArpEvent::DroppedTxExhausted);
            return Ok(());
        }

        let t = self.tx.free.dequeue().expect("checked non-empty above");
        let t_addr: ProducerVirt = t.addr();
        // A free-ring descriptor pointing outside this task's own TX pool is
        // the mux (or our own wiring) handing back a corrupt address, the
        // same class of fault `PoolAddressOutOfRange` covers elsewhere; it
        // halts rather than being silently dropped like the checks above.
        if !self.tx_pool.contains(t_addr) {
            return Err(Halt::PoolAddressOutOfRange);
        }

        if t.len < ARP_FRAME_LEN as u32 {
            outcome.dropped_length_mismatch += 1;
            ringbuf_entry!(ArpEvent::DroppedLengthMismatch);
            self.tx
                .free
                .enqueue(t)
                .expect("just dequeued this slot, ring cannot be full");
            return Ok(());
        }

        let reply = ArpFrame::reply_to(eth_src, request, registered_mac);
        mem.write(t_addr, reply.as_bytes());
        cache.clean(Range::new(t_addr.0, ARP_FRAME_LEN as u32));
        self.tx
            .used
            .enqueue(Descriptor::new(t_addr, ARP_FRAME_LEN as u32, t.cookie))
            .expect("checked tx.used not full above");
        outcome.replied += 1;
        ringbuf_entry!(ArpEvent::Replied { client: owner });
        Ok(())
    }

    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        debug_assert!(self.rx.used.is_empty() || self.rx.used.reader_notify_requested() || !self.rx.free.is_full());
        debug_assert!(self.tx.free.is_empty() || self.tx.free.reader_notify_requested());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sddf_cache::CoherentCacheOps;
    use sddf_net_proto::ArpOpcode as Opcode;
    use sddf_pool::AddressMap;
    use sddf_ring::RingStorage;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Clone)]
    struct TestMemory {
        bytes: Rc<RefCell<HashMap<u64, Vec<u8>>>>,
    }

    impl TestMemory {
        fn new() -> Self {
            TestMemory { bytes: Rc::new(RefCell::new(HashMap::new())) }
        }
        fn set(&self, addr: ProducerVirt, data: &[u8]) {
            self.bytes.borrow_mut().insert(addr.0, data.to_vec());
        }
        fn get(&self, addr: ProducerVirt) -> Vec<u8> {
            self.bytes.borrow().get(&addr.0).cloned().unwrap_or_default()
        }
    }

    impl ArpMemory for TestMemory {
        fn read(&self, addr: ProducerVirt, len: usize) -> &[u8] {
            let data = self.bytes.borrow().get(&addr.0).cloned().unwrap_or_else(|| vec![0; len]);
            Box::leak(data.into_boxed_slice())
        }
        fn write(&mut self, addr: ProducerVirt, data: &[u8]) {
            self.bytes.get_mut().insert(addr.0, data.to_vec());
        }
    }

    fn request_frame(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let eth = EthernetHeader::new(MacAddr::BROADCAST, sender_mac, ETHERTYPE_ARP);
        let arp = ArpPayload::new(Opcode::Request, sender_mac, sender_ip, MacAddr::ZERO, target_ip);
        let mut bytes = eth.as_bytes().to_vec();
        bytes.extend_from_slice(arp.as_bytes());
        bytes
    }

    fn harness(rx_size: u32, tx_size: u32) -> (RingStorage<512>, RingStorage<512>, RingStorage<512>, RingStorage<512>) {
        (
            RingStorage::new(rx_size),
            RingStorage::new(rx_size),
            RingStorage::new(tx_size),
            RingStorage::new(tx_size),
        )
    }

    fn rx_pool_view() -> PoolView {
        let pool = BufferPool::new(ProducerVirt(0x4000_0000), 2048, 512);
        let to_peer = AddressMap::new(0x4000_0000, 0x4000_0000, pool.len_bytes());
        let to_phys = AddressMap::new(0x4000_0000, 0x9000_0000, pool.len_bytes());
        PoolView::new(pool, to_peer, to_phys)
    }

    #[test]
    fn arp_request_is_answered_matching_scenario_one() {
        let (rxf, rxu, txf, txu) = harness(8, 8);
        let rx = RingPair::new(rxf.ring(), rxu.ring());
        let tx = RingPair::new(txf.ring(), txu.ring());
        let tx_pool = BufferPool::new(ProducerVirt(0x9000_0000), 2048, 512);

        let mut arp = ArpResponder::<512, 4>::new(rx, tx, rx_pool_view(), tx_pool, 2048);
        arp.handle_protected_call(
            (0u32 << 8) | REG_IP_OPCODE,
            [Ipv4Addr::from_octets(10, 0, 0, 2).0, 0x0001_5452, 0x0001_0000],
        );

        let requester = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let frame = request_frame(requester, Ipv4Addr::from_octets(10, 0, 0, 1), Ipv4Addr::from_octets(10, 0, 0, 2));

        let mem = TestMemory::new();
        mem.set(ProducerVirt(0x4000_0800), &frame);
        arp.tx.free.enqueue(Descriptor::new(ProducerVirt(0x9000_0000), 2048, 7)).unwrap();
        arp.rx.used.enqueue(Descriptor::new(PeerVirt(0x4000_0800), frame.len() as u32, 3)).unwrap();

        let outcome = arp.handle_rx_notification(&CoherentCacheOps, &mut mem.clone()).unwrap();
        assert_eq!(outcome.replied, 1);
        assert_eq!(outcome.processed, 1);

        let sent = arp.tx.used.dequeue().unwrap();
        assert_eq!(sent.cookie, 7);
        assert_eq!(sent.len, ARP_FRAME_LEN as u32);
        let bytes = mem.get(ProducerVirt(0x9000_0000));
        let reply = ArpFrame::read_from_bytes(&bytes).unwrap();
        assert_eq!(reply.eth.dst.0, requester.0);
        assert_eq!(reply.eth.src.0, [0x52, 0x54, 0x01, 0x00, 0x00, 0x01]);
        assert_eq!(reply.arp.opcode(), Some(Opcode::Reply));
        assert_eq!(reply.arp.sender_ip(), Ipv4Addr::from_octets(10, 0, 0, 2));
        assert_eq!(reply.arp.target_ip(), Ipv4Addr::from_octets(10, 0, 0, 1));
        assert_eq!(reply.pad, [0u8; 10]);
        let recomputed = sddf_net_proto::internet_checksum(&bytes[..42]);
        assert_eq!(recomputed, u16::from_be_bytes(reply.checksum_be));

        let returned = arp.rx.free.dequeue().unwrap();
        assert_eq!(returned.cookie, 3);
        assert_eq!(returned.len, 2048);
    }

    #[test]
    fn lookup_miss_returns_the_rx_buffer_without_a_reply() {
        let (rxf, rxu, txf, txu) = harness(8, 8);
        let rx = RingPair::new(rxf.ring(), rxu.ring());
        let tx = RingPair::new(txf.ring(), txu.ring());
        let tx_pool = BufferPool::new(ProducerVirt(0x9000_0000), 2048, 512);
        let mut arp = ArpResponder::<512, 4>::new(rx, tx, rx_pool_view(), tx_pool, 2048);

        let requester = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let frame = request_frame(requester, Ipv4Addr::from_octets(10, 0, 0, 1), Ipv4Addr::from_octets(10, 0, 0, 9));
        let mem = TestMemory::new();
        mem.set(ProducerVirt(0x4000_0800), &frame);
        arp.tx.free.enqueue(Descriptor::new(ProducerVirt(0x9000_0000), 2048, 7)).unwrap();
        arp.rx.used.enqueue(Descriptor::new(PeerVirt(0x4000_0800), frame.len() as u32, 3)).unwrap();

        let outcome = arp.handle_rx_notification(&CoherentCacheOps, &mut mem.clone()).unwrap();
        assert_eq!(outcome.replied, 0);
        assert_eq!(outcome.dropped_lookup_miss, 1);
        assert!(arp.tx.used.is_empty());
        assert_eq!(arp.rx.free.dequeue().unwrap().cookie, 3);
    }

    #[test]
    fn tx_free_ring_exhausted_drops_silently() {
        let (rxf, rxu, txf, txu) = harness(8, 8);
        let rx = RingPair::new(rxf.ring(), rxu.ring());
        let tx = RingPair::new(txf.ring(), txu.ring());
        let tx_pool = BufferPool::new(ProducerVirt(0x9000_0000), 2048, 512);
        let mut arp = ArpResponder::<512, 4>::new(rx, tx, rx_pool_view(), tx_pool, 2048);
        arp.handle_protected_call(
            REG_IP_OPCODE,
            [Ipv4Addr::from_octets(10, 0, 0, 2).0, 0x0001_5452, 0x0001_0000],
        );

        let requester = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let frame = request_frame(requester, Ipv4Addr::from_octets(10, 0, 0, 1), Ipv4Addr::from_octets(10, 0, 0, 2));
        let mem = TestMemory::new();
        mem.set(ProducerVirt(0x4000_0800), &frame);
        arp.rx.used.enqueue(Descriptor::new(PeerVirt(0x4000_0800), frame.len() as u32, 3)).unwrap();

        let outcome = arp.handle_rx_notification(&CoherentCacheOps, &mut mem.clone()).unwrap();
        assert_eq!(outcome.replied, 0);
        assert_eq!(outcome.dropped_tx_exhausted, 1);
        assert_eq!(arp.rx.free.dequeue().unwrap().cookie, 3);
    }

    #[test]
    fn length_mismatch_is_dropped_and_the_batch_continues() {
        let (rxf, rxu, txf, txu) = harness(8, 8);
        let rx = RingPair::new(rxf.ring(), rxu.ring());
        let tx = RingPair::new(txf.ring(), txu.ring());
        let tx_pool = BufferPool::new(ProducerVirt(0x9000_0000), 2048, 512);
        let mut arp = ArpResponder::<512, 4>::new(rx, tx, rx_pool_view(), tx_pool, 2048);
        arp.handle_protected_call(
            REG_IP_OPCODE,
            [Ipv4Addr::from_octets(10, 0, 0, 2).0, 0x0001_5452, 0x0001_0000],
        );
        arp.handle_protected_call(
            (1u32 << 8) | REG_IP_OPCODE,
            [Ipv4Addr::from_octets(10, 0, 0, 3).0, 0x0002_5452, 0x0002_0000],
        );

        let requester = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let frame1 = request_frame(requester, Ipv4Addr::from_octets(10, 0, 0, 1), Ipv4Addr::from_octets(10, 0, 0, 2));
        let frame2 = request_frame(requester, Ipv4Addr::from_octets(10, 0, 0, 1), Ipv4Addr::from_octets(10, 0, 0, 3));
        let mem = TestMemory::new();
        mem.set(ProducerVirt(0x4000_0800), &frame1);
        mem.set(ProducerVirt(0x4000_1000), &frame2);

        // Too-small buffer first, correctly sized one behind it: the first
        // attempt must put its (unused) buffer back rather than consume it.
        arp.tx.free.enqueue(Descriptor::new(ProducerVirt(0x9000_0000), 10, 1)).unwrap();
        arp.tx.free.enqueue(Descriptor::new(ProducerVirt(0x9000_0800), 2048, 2)).unwrap();
        arp.rx.used.enqueue(Descriptor::new(PeerVirt(0x4000_0800), frame1.len() as u32, 100)).unwrap();
        arp.rx.used.enqueue(Descriptor::new(PeerVirt(0x4000_1000), frame2.len() as u32, 101)).unwrap();

        let outcome = arp.handle_rx_notification(&CoherentCacheOps, &mut mem.clone()).unwrap();
        assert_eq!(outcome.dropped_length_mismatch, 1);
        assert_eq!(outcome.replied, 1);
        let sent = arp.tx.used.dequeue().unwrap();
        assert_eq!(sent.cookie, 2);
        assert!(arp.tx.used.is_empty());
    }
}
