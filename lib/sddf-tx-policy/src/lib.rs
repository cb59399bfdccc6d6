//! TX scheduling policies: which of N clients' outgoing frames get forwarded
//! to the driver's single used ring, and in what order.
//!
//! Both policies here only decide *send-side* scheduling. Returning
//! completed buffers to the client that originally sent them (by address
//! range) is a separate, policy-independent concern handled by the task that
//! owns the driver-facing free ring.

#![cfg_attr(not(test), no_std)]

use sddf_multitimer::Multitimer;
use sddf_ring::Ring;
use sddf_timer_api::{Instant, TimerApi};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PolicyOutcome {
    pub sent: u32,
    pub notify_driver: bool,
}

/// Services clients in a fixed priority order, draining as much of each
/// client's backlog as the driver's used ring permits before moving to the
/// next. If the driver ring fills mid-pass, stops immediately rather than
/// spinning; a full outer pass that moves nothing also stops.
pub struct StrictPriority<const C: usize> {
    order: [usize; C],
}

impl<const C: usize> StrictPriority<C> {
    /// `order[0]` is serviced first on every pass.
    pub fn new(order: [usize; C]) -> Self {
        StrictPriority { order }
    }

    pub fn service<const N: usize>(
        &mut self,
        clients: &[Ring<'_, N>; C],
        driver_used: &Ring<'_, N>,
    ) -> PolicyOutcome {
        let mut sent = 0;
        'outer: loop {
            let mut moved = false;
            for &idx in self.order.iter() {
                while !clients[idx].is_empty() {
                    if driver_used.is_full() {
                        break 'outer;
                    }
                    let d = clients[idx].dequeue().expect("checked non-empty above");
                    driver_used.enqueue(d).expect("checked not full above");
                    sent += 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        PolicyOutcome {
            sent,
            notify_driver: sent > 0 && driver_used.reader_notify_requested(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Window {
    start: Instant,
    bits_used: u64,
    bits_cap: u64,
    window_us: u64,
}

/// Per-client sliding-window bandwidth limiter. Each client may send up to
/// `bits_cap` bits per `window_us` microseconds; once exhausted, the client
/// is skipped and a timer is armed to re-open its window, rather than
/// letting one client's idle capacity starve under a strict ordering.
pub struct BandwidthLimited<const C: usize> {
    windows: [Window; C],
    timers: Multitimer<C>,
}

impl<const C: usize> BandwidthLimited<C> {
    pub fn new(caps: [(u64, u64); C]) -> Self {
        let windows = caps.map(|(bits_cap, window_us)| Window {
            start: Instant(0),
            bits_used: 0,
            bits_cap,
            window_us,
        });
        BandwidthLimited {
            windows,
            timers: Multitimer::new(),
        }
    }

    fn reset_window_if_elapsed(&mut self, idx: usize, now: Instant) {
        let w = &mut self.windows[idx];
        if now.saturating_sub_us(w.start) >= w.window_us {
            w.start = now;
            w.bits_used = 0;
        }
    }

    pub fn service<const N: usize>(
        &mut self,
        clients: &[Ring<'_, N>; C],
        driver_used: &Ring<'_, N>,
        timer: &mut impl TimerApi,
    ) -> PolicyOutcome {
        let now = timer.get_time();
        let mut sent = 0;

        for idx in 0..C {
            self.reset_window_if_elapsed(idx, now);
            loop {
                if driver_used.is_full() {
                    break;
                }
                let Ok(next) = clients[idx].peek() else {
                    break;
                };
                let bits = u64::from(next.len) * 8;
                let w = &self.windows[idx];
                if w.bits_used + bits > w.bits_cap {
                    // Window exhausted: stop waking up for this client's
                    // arrivals until its timer re-opens the window, and
                    // arm that timer for the remainder of the window.
                    clients[idx].clear_reader_notify();
                    let deadline = w.start.add_us(w.window_us);
                    self.timers.set_timer(timer, idx, deadline);
                    break;
                }
                let d = clients[idx].dequeue().expect("peek just confirmed non-empty");
                driver_used.enqueue(d).expect("checked not full above");
                self.windows[idx].bits_used += bits;
                sent += 1;
            }
        }

        PolicyOutcome {
            sent,
            notify_driver: sent > 0 && driver_used.reader_notify_requested(),
        }
    }

    /// Called when the shared timer notification fires. Resets every
    /// client whose window has actually elapsed and re-arms its ring's
    /// wake-up flag so arrivals during the new window are noticed again.
    pub fn on_timer_fired<const N: usize>(
        &mut self,
        clients: &[Ring<'_, N>; C],
        timer: &mut impl TimerApi,
    ) {
        let now = timer.get_time();
        let fired: heapless::Vec<usize, C> = self.timers.drain_fired(now).collect();
        for idx in fired {
            self.windows[idx].start = now;
            self.windows[idx].bits_used = 0;
            clients[idx].request_reader_notify();
        }
        self.timers.rearm_earliest(timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sddf_pool::ProducerVirt;
    use sddf_ring::{Descriptor, RingStorage};
    use sddf_timer_api::FakeTimer;

    fn storage(size: u32) -> RingStorage<512> {
        RingStorage::new(size)
    }

    #[test]
    fn strict_priority_services_higher_priority_client_first_and_yields_when_full() {
        let c0_s = storage(8);
        let c1_s = storage(8);
        let driver_s = storage(2); // one live slot: "capacity 1"
        let c0 = c0_s.ring();
        let c1 = c1_s.ring();
        let driver = driver_s.ring();

        // C1 enqueues frame X first, then C0 enqueues frame Y.
        c1.enqueue(Descriptor::new(ProducerVirt(0x2000), 100, 0xC1)).unwrap();
        c0.enqueue(Descriptor::new(ProducerVirt(0x1000), 100, 0xC0)).unwrap();

        let mut policy = StrictPriority::new([0, 1]);
        let outcome = policy.service(&[c0, c1], &driver);

        assert_eq!(outcome.sent, 1);
        let delivered = driver.dequeue().unwrap();
        assert_eq!(delivered.cookie, 0xC0, "higher priority client's frame must be sent first");
        // X is still queued on C1, untouched.
        assert_eq!(c1.peek().unwrap().cookie, 0xC1);
    }

    #[test]
    fn bandwidth_limit_admits_capacity_then_waits_for_window() {
        let c_s = storage(32);
        let driver_s = storage(32);
        let c = c_s.ring();
        let driver = driver_s.ring();

        for i in 0..10u64 {
            c.enqueue(Descriptor::new(ProducerVirt(0x1000 + i), 125, i)).unwrap(); // 125 bytes = 1000 bits
        }

        let mut timer = FakeTimer::new();
        let mut policy: BandwidthLimited<1> = BandwidthLimited::new([(8_000, 10_000)]);

        let outcome = policy.service(&[c], &driver, &mut timer);
        assert_eq!(outcome.sent, 8, "8000 bits / 1000 bits per frame = 8 frames admitted");
        assert_eq!(timer.last_timeout_rel_us, Some(10_000));

        // Before the window elapses, nothing more should be admitted.
        let outcome2 = policy.service(&[c], &driver, &mut timer);
        assert_eq!(outcome2.sent, 0);

        timer.advance(10_000);
        policy.on_timer_fired(&[c], &mut timer);
        let outcome3 = policy.service(&[c], &driver, &mut timer);
        assert_eq!(outcome3.sent, 2, "remaining two frames admitted once the window reopens");
    }
}
