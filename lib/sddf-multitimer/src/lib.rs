//! A timer multiplexer: treats a single underlying one-shot timer as `N`
//! independent per-client timers.
//!
//! The bandwidth-limited TX policy needs one timer per client to re-arm a
//! client once its window has elapsed, but the timer collaborator
//! ([`sddf_timer_api::TimerApi`]) only offers one armed deadline at a time.
//! `Multitimer` keeps a deadline per client index and only ever asks the
//! underlying timer to move when a new deadline is sooner than the one it is
//! already set for, so clients sharing the timer don't fight each other.

#![cfg_attr(not(test), no_std)]

use sddf_timer_api::{Instant, TimerApi};

/// A timer multiplexer over `N` independently armed client slots.
pub struct Multitimer<const N: usize> {
    deadlines: [Option<Instant>; N],
    current_setting: Option<Instant>,
}

impl<const N: usize> Default for Multitimer<N> {
    fn default() -> Self {
        Multitimer {
            deadlines: [None; N],
            current_setting: None,
        }
    }
}

impl<const N: usize> Multitimer<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `which` to fire at `deadline`, replacing any prior setting.
    /// Pushes the deadline down to the underlying timer only if it is sooner
    /// than whatever the timer is currently set for.
    pub fn set_timer(&mut self, timer: &mut impl TimerApi, which: usize, deadline: Instant) {
        self.deadlines[which] = Some(deadline);
        let sooner = match self.current_setting {
            Some(current) => deadline < current,
            None => true,
        };
        if sooner {
            self.arm(timer, deadline);
        }
    }

    pub fn get_timer(&self, which: usize) -> Option<Instant> {
        self.deadlines[which]
    }

    /// Disarms `which`. If it was the deadline the underlying timer was
    /// tracking, re-arms the timer for the next-soonest remaining deadline,
    /// if any.
    pub fn clear_timer(&mut self, timer: &mut impl TimerApi, which: usize) {
        let former = self.deadlines[which].take();
        if former.is_some() && former == self.current_setting {
            let next = self.deadlines.iter().flatten().min().copied();
            match next {
                Some(d) => self.arm(timer, d),
                None => self.current_setting = None,
            }
        }
    }

    fn arm(&mut self, timer: &mut impl TimerApi, deadline: Instant) {
        let now = timer.get_time();
        timer.set_timeout(deadline.saturating_sub_us(now));
        self.current_setting = Some(deadline);
    }

    /// Returns every client index whose deadline has elapsed as of `now`,
    /// clearing each one as it is reported. Does not re-arm the underlying
    /// timer for remaining deadlines; call [`Multitimer::rearm_earliest`]
    /// after draining if any deadlines remain.
    pub fn drain_fired(&mut self, now: Instant) -> impl Iterator<Item = usize> + '_ {
        self.deadlines.iter_mut().enumerate().filter_map(move |(i, slot)| {
            if matches!(slot, Some(d) if *d <= now) {
                *slot = None;
                Some(i)
            } else {
                None
            }
        })
    }

    /// Re-arms the underlying timer for the earliest remaining deadline, if
    /// any. Intended to be called once after [`Multitimer::drain_fired`] has
    /// removed the timers that just fired.
    pub fn rearm_earliest(&mut self, timer: &mut impl TimerApi) {
        let next = self.deadlines.iter().flatten().min().copied();
        match next {
            Some(d) => self.arm(timer, d),
            None => self.current_setting = None,
        }
    }
}
