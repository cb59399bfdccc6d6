//! Cross-component integration tests: these wire several of the data-plane
//! crates together the way a real deployment's `main.rs` files do, rather
//! than exercising one component in isolation the way each crate's own unit
//! tests do. Each test below follows one end-to-end path a frame actually
//! takes through the system.

use drv_sddf_nic::{Driver, IrqBits, NicFamily};
use sddf_abi::{ClientId, Ipv4Addr, MacAddr};
use sddf_cache::{CacheOps, CoherentCacheOps, Range};
use sddf_net_proto::{ArpOpcode, ArpPayload, EthernetHeader, ETHERNET_HEADER_LEN, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use sddf_pool::{AddressMap, BufferPool, PeerVirt, PoolView, ProducerVirt};
use sddf_ring::{Descriptor, RingPair, RingStorage};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use task_sddf_arp::{ArpResponder, REG_IP_OPCODE};
use task_sddf_rx_copy::RxCopy;
use task_sddf_rx_mux::{BroadcastPolicy, RxMemory, RxMux};
use task_sddf_tx_copy::TxCopy;
use task_sddf_tx_mux::{TxMux, TxPolicy};
use zerocopy::{FromBytes, IntoBytes};

/// A flat, address-keyed byte store standing in for shared memory. One
/// instance is shared (via `Rc<RefCell<_>>`) across every component in a
/// test so that a write through one component's view is visible through
/// another's, exactly as it would be through real shared memory.
#[derive(Clone)]
struct Memory {
    bytes: Rc<RefCell<HashMap<u64, Vec<u8>>>>,
}

impl Memory {
    fn new() -> Self {
        Memory { bytes: Rc::new(RefCell::new(HashMap::new())) }
    }
    fn set_raw(&self, addr: u64, data: &[u8]) {
        self.bytes.borrow_mut().insert(addr, data.to_vec());
    }
    fn get_raw(&self, addr: u64, len: usize) -> Vec<u8> {
        let stored = self.bytes.borrow().get(&addr).cloned().unwrap_or_default();
        let mut v = stored;
        v.resize(len, 0);
        v
    }
}

impl RxMemory for Memory {
    fn read(&self, addr: PeerVirt, len: usize) -> &[u8] {
        Box::leak(self.get_raw(addr.0, len).into_boxed_slice())
    }
}

impl sddf_copy_shim::SourceMemory for Memory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8] {
        Box::leak(self.get_raw(addr.0, len).into_boxed_slice())
    }
}

impl sddf_copy_shim::DestMemory for Memory {
    fn write(&mut self, addr: ProducerVirt, data: &[u8]) {
        self.set_raw(addr.0, data);
    }
}

impl task_sddf_arp::ArpMemory for Memory {
    fn read(&self, addr: ProducerVirt, len: usize) -> &[u8] {
        Box::leak(self.get_raw(addr.0, len).into_boxed_slice())
    }
    fn write(&mut self, addr: ProducerVirt, data: &[u8]) {
        self.set_raw(addr.0, data);
    }
}

/// A no-op cache backend that also counts invalidate/clean calls, so tests
/// can assert the mux actually touched the cache around a DMA handoff.
#[derive(Clone, Default)]
struct CountingCache {
    invalidated: Rc<Cell<u32>>,
    cleaned: Rc<Cell<u32>>,
}

impl CacheOps for CountingCache {
    fn clean(&self, _range: Range) {
        self.cleaned.set(self.cleaned.get() + 1);
    }
    fn invalidate(&self, _range: Range) {
        self.invalidated.set(self.invalidated.get() + 1);
    }
    fn clean_invalidate(&self, range: Range) {
        self.clean(range);
        self.invalidate(range);
    }
}

fn frame_with_dst(dst: MacAddr) -> Vec<u8> {
    let eth = EthernetHeader::new(dst, MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x10]), ETHERTYPE_IPV4);
    let mut bytes = eth.as_bytes().to_vec();
    bytes.extend_from_slice(&[0xAAu8; 46]);
    bytes
}

fn pool_view(own_base: u64, peer_base: u64, phys_base: u64) -> PoolView {
    let pool = BufferPool::new(ProducerVirt(own_base), 2048, 512);
    let to_peer = AddressMap::new(own_base, peer_base, pool.len_bytes());
    let to_phys = AddressMap::new(own_base, phys_base, pool.len_bytes());
    PoolView::new(pool, to_peer, to_phys)
}

/// Drives a frame from the NIC driver's used ring all the way into a
/// client's own pool: `RxMux` fans it out by MAC, `RxCopy` then copies it
/// out of the driver's shared pool into the client's private one.
#[test]
fn rx_pipeline_driver_to_mux_to_copy_delivers_bytes_unchanged_into_the_clients_own_pool() {
    let mem = Memory::new();
    let cache = CountingCache::default();

    let driver_free_s = RingStorage::<512>::new(32);
    let driver_used_s = RingStorage::<512>::new(32);
    let mux_client_free_s = RingStorage::<512>::new(32);
    let mux_client_used_s = RingStorage::<512>::new(32);
    let copy_client_free_s = RingStorage::<512>::new(32);
    let copy_client_used_s = RingStorage::<512>::new(32);

    let driver_ring = RingPair::new(driver_free_s.ring(), driver_used_s.ring());
    let mux_side = RingPair::new(mux_client_free_s.ring(), mux_client_used_s.ring());
    let copy_upstream = RingPair::new(mux_client_free_s.ring(), mux_client_used_s.ring());
    let copy_downstream = RingPair::new(copy_client_free_s.ring(), copy_client_used_s.ring());

    const DRIVER_POOL_BASE: u64 = 0x4000_0000;
    let mac = MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]);
    let mut table: fixedmap::FixedMap<MacAddr, ClientId, 1> = fixedmap::FixedMap::default();
    table.insert(mac, ClientId(0));

    let frame = frame_with_dst(mac);
    mem.set_raw(DRIVER_POOL_BASE, &frame);
    driver_ring
        .used
        .enqueue(Descriptor::new(PeerVirt(DRIVER_POOL_BASE), frame.len() as u32, 0xAAAA))
        .unwrap();

    let pool_views = [pool_view(DRIVER_POOL_BASE, DRIVER_POOL_BASE, 0x9000_0000)];
    let mut mux = RxMux::<512, 1>::new(driver_ring, [mux_side], table, BroadcastPolicy::DesignatedClient(ClientId(0)), pool_views);
    let outcome = mux.handle_driver_notification(&mem, &cache);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.dropped, 0);
    assert_eq!(cache.invalidated.get(), 1);

    const CLIENT_POOL_BASE: u64 = 0x6000_0000;
    let client_pool = BufferPool::new(ProducerVirt(CLIENT_POOL_BASE), 2048, 512);
    copy_downstream.free.enqueue(Descriptor::new(ProducerVirt(CLIENT_POOL_BASE), 2048, 0xBBBB)).unwrap();

    let mut copy = RxCopy::<512>::new(copy_upstream, copy_downstream, client_pool, 2048);
    let mut dst_mem = mem.clone();
    let result = copy.handle_notification(&cache, &mem, &mut dst_mem).unwrap();
    assert_eq!(result.copied, 1);

    let copied = mem.get_raw(CLIENT_POOL_BASE, frame.len());
    assert_eq!(copied, frame);
}

/// Drives a frame in the other direction: a client's TX buffer, through
/// `TxCopy` into the trusted pool, then through `TxMux::handle_client_send_notification`'s
/// address translation onto a staging ring ready for the driver.
#[test]
fn tx_pipeline_client_to_copy_to_mux_translates_and_stages_for_the_driver() {
    let mem = Memory::new();
    let cache = CoherentCacheOps;

    const CLIENT_POOL_BASE: u64 = 0x6000_0000;
    const MUX_POOL_BASE: u64 = 0x4000_0000;
    const MUX_PHYS_BASE: u64 = 0x9000_0000;

    let client_free_s = RingStorage::<512>::new(32);
    let client_used_s = RingStorage::<512>::new(32);
    let copy_mux_free_s = RingStorage::<512>::new(32);
    let copy_mux_used_s = RingStorage::<512>::new(32);

    let copy_upstream = RingPair::new(client_free_s.ring(), client_used_s.ring());
    let copy_downstream = RingPair::new(copy_mux_free_s.ring(), copy_mux_used_s.ring());

    let payload = frame_with_dst(MacAddr::BROADCAST);
    mem.set_raw(CLIENT_POOL_BASE, &payload);
    client_used_s
        .ring()
        .enqueue(Descriptor::new(ProducerVirt(CLIENT_POOL_BASE), payload.len() as u32, 7))
        .unwrap();
    copy_mux_free_s.ring().enqueue(Descriptor::new(ProducerVirt(MUX_POOL_BASE), 2048, 99)).unwrap();

    let mux_pool = BufferPool::new(ProducerVirt(MUX_POOL_BASE), 2048, 512);
    let mut copy = TxCopy::<512>::new(copy_upstream, copy_downstream, mux_pool, 2048);
    let mut dst_mem = mem.clone();
    let copy_outcome = copy.handle_notification(&cache, &mem, &mut dst_mem).unwrap();
    assert_eq!(copy_outcome.copied, 1);

    let driver_free_s = RingStorage::<512>::new(32);
    let driver_used_s = RingStorage::<512>::new(32);
    let staging_s = RingStorage::<512>::new(32);
    let mux_client_ring = RingPair::new(copy_mux_free_s.ring(), copy_mux_used_s.ring());
    let driver_ring = RingPair::new(driver_free_s.ring(), driver_used_s.ring());

    let pv = pool_view(MUX_POOL_BASE, MUX_POOL_BASE, MUX_PHYS_BASE);
    let mut mux = TxMux::<512, 1>::new(
        driver_ring,
        [mux_client_ring],
        [staging_s.ring()],
        [pv],
        TxPolicy::Strict(sddf_tx_policy::StrictPriority::new([0])),
    );
    let admit = mux.handle_client_send_notification(ClientId(0)).unwrap();
    assert_eq!(admit.admitted, 1);

    let mut timer = sddf_timer_api::FakeTimer::new();
    let sent = mux.service_policy(&mut timer);
    assert_eq!(sent.sent, 1);
    assert!(!driver_used_s.ring().is_empty());
}

/// Scenario 6 from the ring substrate, reproduced one layer up: a client
/// that stops polling after observing an empty ring, and a driver that
/// enqueues afterward, must still see each other's notify flags and neither
/// side may go permanently silent.
#[test]
fn driver_and_rx_mux_do_not_lose_a_wakeup_across_the_double_check_protocol() {
    let driver_free_s = RingStorage::<512>::new(8);
    let driver_used_s = RingStorage::<512>::new(8);
    let used = driver_used_s.ring();

    assert!(used.is_empty());
    let armed_empty = used.arm_and_recheck_empty();
    assert!(armed_empty);
    assert!(used.reader_notify_requested());

    used.enqueue(Descriptor::new(PeerVirt(0x1000), 64, 1)).unwrap();
    assert!(used.producer_owes_notify());
}

/// A client that hands `TxMux` an address outside its own pool must halt
/// the mux rather than admit a forged or miscomputed descriptor.
#[test]
fn tx_mux_halts_when_a_client_admits_an_out_of_range_address() {
    let driver_free_s = RingStorage::<512>::new(8);
    let driver_used_s = RingStorage::<512>::new(8);
    let client_free_s = RingStorage::<512>::new(8);
    let client_used_s = RingStorage::<512>::new(8);
    let staging_s = RingStorage::<512>::new(8);

    client_used_s.ring().enqueue(Descriptor::new(ProducerVirt(0xDEAD_0000), 64, 1)).unwrap();

    let driver_ring = RingPair::new(driver_free_s.ring(), driver_used_s.ring());
    let client_ring = RingPair::new(client_free_s.ring(), client_used_s.ring());
    let pv = pool_view(0x4000_0000, 0x4000_0000, 0x9000_0000);
    let mut mux = TxMux::<512, 1>::new(
        driver_ring,
        [client_ring],
        [staging_s.ring()],
        [pv],
        TxPolicy::Strict(sddf_tx_policy::StrictPriority::new([0])),
    );

    let result = mux.handle_client_send_notification(ClientId(0));
    assert!(result.is_err());
}

/// A frame with no matching entry in the MAC table is dropped back to the
/// driver's own free ring rather than delivered anywhere, and the driver
/// can immediately recycle it into a fresh hardware RX slot -- the
/// mux-to-driver leg of the path an unmatched frame actually takes.
#[test]
fn unmatched_frame_is_recycled_back_into_the_driver_free_ring() {
    struct NullFamily;
    impl NicFamily for NullFamily {
        fn setup(&mut self) {}
        fn refill_rx_slot(&self, _idx: usize, _phys: sddf_pool::Phys) {}
        fn is_rx_slot_owned_by_dma(&self, _idx: usize) -> bool {
            false
        }
        fn rx_slot_len(&self, _idx: usize) -> u32 {
            0
        }
        fn send_tx_slot(&self, _idx: usize, _phys: sddf_pool::Phys, _len: u32) {}
        fn is_tx_slot_owned_by_dma(&self, _idx: usize) -> bool {
            false
        }
        fn irq_bits(&self) -> IrqBits {
            IrqBits::empty()
        }
    }

    let mem = Memory::new();
    let cache = CoherentCacheOps;

    const DRIVER_POOL_BASE: u64 = 0x4000_0000;
    let frame = frame_with_dst(MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));
    mem.set_raw(DRIVER_POOL_BASE, &frame);

    let driver_free_s = RingStorage::<512>::new(8);
    let driver_used_s = RingStorage::<512>::new(8);
    let client_free_s = RingStorage::<512>::new(8);
    let client_used_s = RingStorage::<512>::new(8);

    driver_used_s.ring().enqueue(Descriptor::new(PeerVirt(DRIVER_POOL_BASE), frame.len() as u32, 42)).unwrap();

    let table: fixedmap::FixedMap<MacAddr, ClientId, 1> = fixedmap::FixedMap::default();
    let driver_ring = RingPair::new(driver_free_s.ring(), driver_used_s.ring());
    let client_ring = RingPair::new(client_free_s.ring(), client_used_s.ring());
    let pool_views = [pool_view(DRIVER_POOL_BASE, DRIVER_POOL_BASE, 0x9000_0000)];

    let mut mux = RxMux::<512, 1>::new(driver_ring, [client_ring], table, BroadcastPolicy::DesignatedClient(ClientId(0)), pool_views);
    let outcome = mux.handle_driver_notification(&mem, &cache);
    assert_eq!(outcome.dropped, 1);
    assert_eq!(outcome.delivered, 0);

    let rx_to_phys = AddressMap::new(DRIVER_POOL_BASE, 0x9000_0000, 2048 * 512);
    let mut driver: Driver<NullFamily, 4> = Driver::new(NullFamily, rx_to_phys);
    let refill_outcome = driver.refill_rx(&driver_free_s.ring());
    assert!(!refill_outcome.woke_upstream);
}

/// Scenario 1 one layer up: a client registers its IP via the `REG_IP`
/// protected call, the RX mux is never in the loop (the ARP responder sits
/// directly on its own driver-facing rings), and a subsequent request for
/// that IP gets answered with the registered MAC.
#[test]
fn arp_responder_answers_a_request_for_an_address_registered_moments_earlier() {
    let mem = Memory::new();
    let cache = CoherentCacheOps;

    const RX_POOL_BASE: u64 = 0x4000_0000;
    const TX_POOL_BASE: u64 = 0x5000_0000;

    let rx_free_s = RingStorage::<512>::new(8);
    let rx_used_s = RingStorage::<512>::new(8);
    let tx_free_s = RingStorage::<512>::new(8);
    let tx_used_s = RingStorage::<512>::new(8);

    let rx = RingPair::new(rx_free_s.ring(), rx_used_s.ring());
    let tx = RingPair::new(tx_free_s.ring(), tx_used_s.ring());
    let rx_pool_view = pool_view(RX_POOL_BASE, RX_POOL_BASE, 0x9000_0000);
    let tx_pool = BufferPool::new(ProducerVirt(TX_POOL_BASE), 2048, 512);

    let mut arp = ArpResponder::<512, 4>::new(rx, tx, rx_pool_view, tx_pool, 2048);

    let client_mac = [0x52u8, 0x54, 0x01, 0x00, 0x00, 0x01];
    let target_ip = Ipv4Addr::from_octets(10, 0, 0, 2);
    let mac_lo32 = u32::from_le_bytes([client_mac[0], client_mac[1], client_mac[2], client_mac[3]]);
    let mac_hi32 = u32::from_be_bytes([client_mac[4], client_mac[5], 0, 0]);
    let label = (0u32 << 8) | REG_IP_OPCODE;
    arp.handle_protected_call(label, [target_ip.0, mac_lo32, mac_hi32]);

    let sender_mac = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let sender_ip = Ipv4Addr::from_octets(10, 0, 0, 9);
    let eth = EthernetHeader::new(MacAddr::BROADCAST, sender_mac, ETHERTYPE_ARP);
    let request = ArpPayload::new(ArpOpcode::Request, sender_mac, sender_ip, MacAddr::ZERO, target_ip);
    let mut request_bytes = eth.as_bytes().to_vec();
    request_bytes.extend_from_slice(request.as_bytes());

    mem.set_raw(RX_POOL_BASE, &request_bytes);
    rx_used_s
        .ring()
        .enqueue(Descriptor::new(PeerVirt(RX_POOL_BASE), request_bytes.len() as u32, 1))
        .unwrap();
    tx_free_s.ring().enqueue(Descriptor::new(ProducerVirt(TX_POOL_BASE), 2048, 2)).unwrap();

    let outcome = arp.handle_rx_notification(&cache, &mut mem.clone()).unwrap();
    assert_eq!(outcome.replied, 1);
    assert!(!tx_used_s.ring().is_empty());

    let reply_d = tx_used_s.ring().dequeue().unwrap();
    let reply_bytes = mem.get_raw(reply_d.addr::<ProducerVirt>().0, reply_d.len as usize);
    let reply_eth = EthernetHeader::read_from_bytes(&reply_bytes[..ETHERNET_HEADER_LEN]).unwrap();
    assert_eq!(reply_eth.src, MacAddr(client_mac));
    assert_eq!(reply_eth.dst, sender_mac);
}

proptest::proptest! {
    /// For any sequence of frames handed to the RX mux, each destined either
    /// to the one registered client or to an unregistered MAC, every frame
    /// is accounted for exactly once -- delivered or dropped, never both,
    /// never neither, and a delivered frame always lands on the client its
    /// destination MAC names.
    #[test]
    fn rx_mux_conserves_every_frame_it_is_handed(
        destined_for_known_client in proptest::collection::vec(proptest::bool::ANY, 1..24)
    ) {
        let mem = Memory::new();
        let cache = CoherentCacheOps;
        const DRIVER_POOL_BASE: u64 = 0x4000_0000;
        const SLOT: u64 = 2048;

        let known_mac = MacAddr([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]);
        let unknown_mac = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let mut table: fixedmap::FixedMap<MacAddr, ClientId, 1> = fixedmap::FixedMap::default();
        table.insert(known_mac, ClientId(0));

        let n = destined_for_known_client.len() as u32;
        let driver_free_s = RingStorage::<512>::new(64);
        let driver_used_s = RingStorage::<512>::new(64);
        let client_free_s = RingStorage::<512>::new(64);
        let client_used_s = RingStorage::<512>::new(64);

        for (i, to_known) in destined_for_known_client.iter().enumerate() {
            let dst = if *to_known { known_mac } else { unknown_mac };
            let frame = frame_with_dst(dst);
            let addr = DRIVER_POOL_BASE + (i as u64) * SLOT;
            mem.set_raw(addr, &frame);
            driver_used_s.ring().enqueue(Descriptor::new(PeerVirt(addr), frame.len() as u32, i as u64)).unwrap();
        }

        let driver_ring = RingPair::new(driver_free_s.ring(), driver_used_s.ring());
        let client_ring = RingPair::new(client_free_s.ring(), client_used_s.ring());
        let pool_views = [pool_view(DRIVER_POOL_BASE, DRIVER_POOL_BASE, 0x9000_0000)];
        let mut mux = RxMux::<512, 1>::new(driver_ring, [client_ring], table, BroadcastPolicy::DesignatedClient(ClientId(0)), pool_views);

        let outcome = mux.handle_driver_notification(&mem, &cache);
        proptest::prop_assert_eq!(outcome.delivered + outcome.dropped, n);

        let expected_delivered = destined_for_known_client.iter().filter(|x| **x).count() as u32;
        proptest::prop_assert_eq!(outcome.delivered, expected_delivered);
        proptest::prop_assert_eq!(client_used_s.ring().len(), expected_delivered);
    }
}
