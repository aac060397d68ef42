//! Per-flow scheduling state.

use crate::{
    key::FlowKey,
    packet::Timestamped,
    queue::FlowQueue,
    units::{Bytes, Nanosecs},
    Packet,
};

handle!(FlowHandle);

/// Which of the three service lists (or neither) a flow currently sits on.
///
/// Substitutes for the source's LSB-tagged pointer union and sentinel
/// `next == &throttled` encoding (§9 design note): an explicit tagged
/// variant is clearer in safe Rust and just as cheap to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    New,
    Old,
    Co,
    Throttled,
    /// Idle and empty; eligible for garbage collection once the table is
    /// under GC pressure. `since` is the age clock value at detach time,
    /// also the value `flow_refill_delay` is measured against on
    /// re-admission.
    Detached { since: Nanosecs },
}

/// A single flow's queue, credit balance, and pacing state.
#[derive(Debug)]
pub(crate) struct FlowRecord<P> {
    pub(crate) handle: FlowHandle,
    pub(crate) key: FlowKey,
    pub(crate) queue: FlowQueue<P>,

    /// DRR credit balance, in bytes. Can go negative transiently when a
    /// packet larger than the remaining credit is admitted (the credit
    /// simply goes negative and is repaid out of the next quantum).
    pub(crate) credit: i64,

    /// Earliest time this flow's head packet may depart, enforced by
    /// pacing. Equal to `Nanosecs::ZERO` when the flow is not paced ahead
    /// of the current packet.
    pub(crate) time_next_packet: Nanosecs,

    /// Last hash observed on enqueue. Overwritten unconditionally on every
    /// enqueue regardless of whether the flow was classified by socket or
    /// by hash — see `DESIGN.md`'s note on the preserved overwrite quirk.
    pub(crate) socket_hash: u32,

    pub(crate) membership: Membership,

    /// Running count of packets admitted to this flow, for the per-flow
    /// packet limit.
    pub(crate) qlen: u32,
}

impl<P> FlowRecord<P> {
    pub(crate) fn new(handle: FlowHandle, key: FlowKey) -> Self {
        Self {
            handle,
            key,
            queue: FlowQueue::default(),
            credit: 0,
            time_next_packet: Nanosecs::ZERO,
            socket_hash: 0,
            membership: Membership::Detached {
                since: Nanosecs::ZERO,
            },
            qlen: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn is_throttled(&self) -> bool {
        matches!(self.membership, Membership::Throttled)
    }

    pub(crate) fn is_detached(&self) -> bool {
        matches!(self.membership, Membership::Detached { .. })
    }

    /// `since` of `Membership::Detached`, if the flow is currently detached.
    pub(crate) fn detached_since(&self) -> Option<Nanosecs> {
        match self.membership {
            Membership::Detached { since } => Some(since),
            _ => None,
        }
    }
}

impl<P: Packet> FlowRecord<P> {
    pub(crate) fn enqueue(
        &mut self,
        time_to_send: Nanosecs,
        explicit_departure: bool,
        hash: u32,
        packet: P,
    ) {
        self.socket_hash = hash;
        self.qlen += 1;
        self.queue.push(time_to_send, explicit_departure, packet);
    }

    pub(crate) fn dequeue(&mut self) -> Option<Timestamped<P>> {
        let pkt = self.queue.pop();
        if pkt.is_some() {
            self.qlen = self.qlen.saturating_sub(1);
        }
        pkt
    }

    pub(crate) fn peek_time_to_send(&self) -> Option<Nanosecs> {
        self.queue.peek().map(|t| t.time_to_send)
    }

    pub(crate) fn peek_length(&self) -> Option<Bytes> {
        self.queue.peek().map(|t| t.packet.length())
    }
}
