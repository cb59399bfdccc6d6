//! Generic single-threaded event-handler substrate.
//!
//! Every data-plane task is a loop that blocks for one event -- a wake-up
//! notification, a protected call from a peer, or a hardware interrupt --
//! runs its handler to completion, and blocks again. This crate models that
//! shape without committing to any one host framework's syscall ABI, since
//! the concrete kernel is outside the scope of this repository: it gives
//! task crates a `Notifier` and `ProtectedCall` capability to program
//! against, and a `FakeRuntime` that implements both in host memory for
//! tests.

#![cfg_attr(not(any(test, feature = "test-util")), no_std)]

pub use sddf_abi::ChannelId;

/// A component's outbound signalling capability.
///
/// `notify` delivers a wake-up immediately (incurring a kernel entry right
/// away). `notify_delayed` records that a channel wants a wake-up without
/// delivering it yet; the task's event loop calls `flush_delayed` once, after
/// the handler has finished all of its own work, so that multiple delayed
/// requests collapse into at most one signal per channel per event.
///
/// Modelling "delayed" as an explicit method rather than a hidden flag is
/// deliberate: it keeps the coalescing behavior visible at the call site
/// instead of buried in a side effect.
pub trait Notifier {
    fn notify(&mut self, channel: ChannelId);
    fn notify_delayed(&mut self, channel: ChannelId);
    fn flush_delayed(&mut self);
}

/// A component's protected-call transport: label plus up to three
/// register-sized arguments in, up to two register-sized values out.
pub trait ProtectedCall {
    fn call(&mut self, label: u32, args: [u32; 3]) -> [u32; 2];
}

/// One event delivered to a task's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A notification bitmask, already filtered by the task's wait mask.
    Notification(u32),
    /// A protected call from a peer, awaiting a two-word reply.
    ProtectedCall { label: u32, args: [u32; 3] },
}

/// Something that can block a task until the next `Event`.
pub trait EventSource {
    fn wait(&mut self, mask: u32) -> Event;
}

/// A fatal condition a task's event loop cannot retry past.
///
/// Library code below the event loop never panics on one of these; it
/// returns `Err(Halt::...)` (or the task-specific error the `main` loop maps
/// onto one of these variants) so the decision to stop processing and report
/// is visible at the call site closest to the loop, not buried in a deep
/// `unwrap`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Halt {
    /// The NIC reported a bus/uDMA error.
    BusError,
    /// The driver's own completion accounting found a slot it has no record
    /// of having issued.
    LostDescriptor,
    /// A peer handed back an address outside the pool it should belong to.
    PoolAddressOutOfRange,
    /// A notification bit fired that this component's wait mask did not
    /// expect.
    UnexpectedNotification,
}

/// Dispatches one event from `source`, routing it to `on_notify` or
/// `on_call`.
///
/// This is the generalised analogue of a kernel-specific receive-and-decode
/// loop: it does the routing paperwork so task `main` functions can be a flat
/// `loop { recv(..., |n| ..., |label, args| ...) }`.
pub fn recv<S>(
    source: &mut impl EventSource,
    mask: u32,
    state: &mut S,
    on_notify: impl FnOnce(&mut S, u32),
    on_call: impl FnOnce(&mut S, u32, [u32; 3]) -> [u32; 2],
) -> Option<[u32; 2]> {
    match source.wait(mask) {
        Event::Notification(bits) => {
            on_notify(state, bits);
            None
        }
        Event::ProtectedCall { label, args } => Some(on_call(state, label, args)),
    }
}

#[cfg(any(test, feature = "test-util"))]
mod host_support {
    use super::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// A `Notifier` + `ProtectedCall` + `EventSource` entirely in host
    /// memory, recording every call for test assertions.
    #[derive(Default)]
    pub struct FakeRuntime {
        pub immediate: Vec<ChannelId>,
        pending_delayed: Vec<ChannelId>,
        pub delivered_delayed: Vec<ChannelId>,
        queue: VecDeque<Event>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_event(&mut self, ev: Event) {
            self.queue.push_back(ev);
        }

        pub fn take_immediate(&mut self) -> Vec<ChannelId> {
            core::mem::take(&mut self.immediate)
        }
    }

    impl Notifier for FakeRuntime {
        fn notify(&mut self, channel: ChannelId) {
            self.immediate.push(channel);
        }

        fn notify_delayed(&mut self, channel: ChannelId) {
            if !self.pending_delayed.contains(&channel) {
                self.pending_delayed.push(channel);
            }
        }

        fn flush_delayed(&mut self) {
            self.delivered_delayed.append(&mut self.pending_delayed);
        }
    }

    impl ProtectedCall for FakeRuntime {
        fn call(&mut self, _label: u32, _args: [u32; 3]) -> [u32; 2] {
            [0, 0]
        }
    }

    impl EventSource for FakeRuntime {
        fn wait(&mut self, _mask: u32) -> Event {
            self.queue.pop_front().expect("no event queued for FakeRuntime::wait")
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use host_support::FakeRuntime;
