//! Per-flow pacing: the throttle set ordered by `time_next_packet`, the
//! cached minimum that drives the single external watchdog, and the
//! unthrottle-latency EWMA (§4.3).

use std::collections::BTreeSet;

use crate::{flow::FlowHandle, units::Nanosecs};

/// Ordered set of paced (throttled) flows, keyed by `(time_next_packet,
/// handle)` so multiple flows sharing a pacing deadline remain distinct
/// set members. Mirrors the source's `q->delayed` rbtree plus
/// `q->time_next_delayed_flow`.
#[derive(Debug, Default)]
pub(crate) struct ThrottleSet {
    set: BTreeSet<(Nanosecs, FlowHandle)>,
    /// Smoothed latency, in nanoseconds, between a flow becoming eligible
    /// to unthrottle and actually being serviced. Fixed-point, using the
    /// same `x -= x>>3; x += sample>>3` update as the kernel's rate
    /// estimators (not a floating-point EWMA).
    unthrottle_latency_ns: i64,
}

impl ThrottleSet {
    pub(crate) fn throttle(&mut self, handle: FlowHandle, time_next_packet: Nanosecs) {
        self.set.insert((time_next_packet, handle));
    }

    pub(crate) fn remove(&mut self, handle: FlowHandle, time_next_packet: Nanosecs) {
        self.set.remove(&(time_next_packet, handle));
    }

    /// The time at which the next throttled flow becomes eligible, i.e.
    /// the value that should be handed to the host's watchdog timer.
    pub(crate) fn next_deadline(&self) -> Option<Nanosecs> {
        self.set.iter().next().map(|&(t, _)| t)
    }

    /// Pops every flow whose `time_next_packet` is `<= now`, in deadline
    /// order, recording the observed unthrottle latency for each.
    pub(crate) fn drain_ready(&mut self, now: Nanosecs) -> Vec<FlowHandle> {
        let mut ready = Vec::new();
        while let Some(&(t, handle)) = self.set.iter().next() {
            if t > now {
                break;
            }
            self.set.remove(&(t, handle));
            let sample = now.into_u64().saturating_sub(t.into_u64()) as i64;
            self.unthrottle_latency_ns -= self.unthrottle_latency_ns >> 3;
            self.unthrottle_latency_ns += sample >> 3;
            ready.push(handle);
        }
        ready
    }

    pub(crate) fn unthrottle_latency_ns(&self) -> i64 {
        self.unthrottle_latency_ns
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_only_eligible_flows_in_deadline_order() {
        let mut t = ThrottleSet::default();
        t.throttle(FlowHandle::from_usize(2), Nanosecs::new(30));
        t.throttle(FlowHandle::from_usize(0), Nanosecs::new(10));
        t.throttle(FlowHandle::from_usize(1), Nanosecs::new(20));

        let ready = t.drain_ready(Nanosecs::new(20));
        assert_eq!(
            ready,
            vec![FlowHandle::from_usize(0), FlowHandle::from_usize(1)]
        );
        assert_eq!(t.len(), 1);
        assert_eq!(t.next_deadline(), Some(Nanosecs::new(30)));
    }

    #[test]
    fn ewma_tracks_latency_samples() {
        let mut t = ThrottleSet::default();
        t.throttle(FlowHandle::from_usize(0), Nanosecs::new(0));
        t.drain_ready(Nanosecs::new(800));
        assert!(t.unthrottle_latency_ns() > 0);
    }
}
