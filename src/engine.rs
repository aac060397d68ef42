//! The DRR service-list engine: `new`/`old`/`co` list bookkeeping, credit
//! accounting, pacing consult, and the co-flow priority-burst override
//! (§4.4).

use std::collections::VecDeque;

use crate::{
    config::{CoFlowPorts, Config},
    flow::{FlowHandle, FlowRecord, Membership},
    key::SocketInfo,
    packet::Timestamped,
    table::FlowTable,
    throttle::ThrottleSet,
    units::{Bytes, BytesPerSec, Nanosecs},
    Packet,
};

/// Which list a flow was drawn from, for stats/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    New,
    Old,
    Co,
}

/// Bookkeeping produced by one successful `Engine::dequeue` call, reported
/// back to the caller so it can update `Stats` without the engine needing
/// to know about statistics itself.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DequeueEvents {
    pub(crate) promotions: u32,
    pub(crate) flips: u32,
    pub(crate) ce_marked: bool,
}

/// Owns the three service lists and the co-flow promotion state. Credit
/// and pacing state live on `FlowRecord` itself (§9: per-flow fields, not
/// per-list), matching the source's design.
#[derive(Debug, Default)]
pub(crate) struct Engine {
    new_list: VecDeque<FlowHandle>,
    old_list: VecDeque<FlowHandle>,
    co_list: VecDeque<FlowHandle>,

    /// Live co-flow identity slots, captured lazily from `socket_hash` the
    /// first time a packet's source port matches a configured co-flow
    /// port (§9 Open Questions; `DESIGN.md`). Promotion itself happens in
    /// the selection loop (`dequeue`), matching the source's
    /// `fq_dequeue()` -- not here at capture time.
    co_flow_hashes: [Option<u32>; 2],
    /// Count of co-flow-matching flows promoted since the burst last
    /// fully drained; drives the `flipflag` arm/disarm transitions.
    ucounter: u8,
    /// Whether the co list is currently being drained in priority-burst
    /// mode.
    flipflag: bool,
}

impl Engine {
    pub(crate) fn push_new(&mut self, handle: FlowHandle) {
        self.new_list.push_back(handle);
    }

    fn push_old(&mut self, handle: FlowHandle) {
        self.old_list.push_back(handle);
    }

    fn push_co(&mut self, handle: FlowHandle) {
        self.co_list.push_back(handle);
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut VecDeque<FlowHandle> {
        match kind {
            ListKind::New => &mut self.new_list,
            ListKind::Old => &mut self.old_list,
            ListKind::Co => &mut self.co_list,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.new_list.is_empty() && self.old_list.is_empty() && self.co_list.is_empty()
    }

    /// Re-admits a flow that just became eligible after being throttled.
    /// Always goes to the tail of `old`, matching the source: a throttled
    /// flow is pulled off whichever list it was on, and on waking is simply
    /// added back to `old_flows` rather than restored to its prior list.
    pub(crate) fn unthrottle<P: Packet>(&mut self, table: &mut FlowTable<P>, handle: FlowHandle) {
        self.old_list.push_back(handle);
        if let Some(flow) = table.get_mut(handle) {
            flow.membership = Membership::Old;
        }
    }

    /// Captures a freshly-enqueued packet's socket hash into the co-flow
    /// identity slots when its source port matches a configured co-flow
    /// port and the slot has not yet been filled (§9 Open Questions: the
    /// source re-derives this from `socket_hash`, which is itself
    /// overwritten on every enqueue, not resolved once at configuration).
    pub(crate) fn capture_co_flow_identity(
        &mut self,
        ports: &CoFlowPorts,
        socket: Option<SocketInfo>,
        socket_hash: u32,
    ) {
        let Some(socket) = socket else {
            return;
        };
        if Some(socket.source_port) == ports.first && self.co_flow_hashes[0].is_none() {
            self.co_flow_hashes[0] = Some(socket_hash);
        }
        if Some(socket.source_port) == ports.second && self.co_flow_hashes[1].is_none() {
            self.co_flow_hashes[1] = Some(socket_hash);
        }
    }

    fn matches_co_flow(&self, socket_hash: u32) -> bool {
        self.co_flow_hashes.iter().any(|h| *h == Some(socket_hash))
    }

    /// Enqueue-side list placement. A freshly-admitted (previously
    /// detached) flow always lands on `new`, never directly on `co` --
    /// the source always does `fq_flow_add_tail(&q->new_flows, f)` on
    /// admission; the co-flow mechanism only ever promotes a flow once it
    /// reaches the head of `new`/`old` during selection (`dequeue`).
    pub(crate) fn admit<P: Packet>(&mut self, table: &mut FlowTable<P>, handle: FlowHandle) {
        self.push_new(handle);
        if let Some(flow) = table.get_mut(handle) {
            flow.membership = Membership::New;
        }
    }

    /// Runs the DRR selection loop and, if a packet is ready to depart,
    /// dequeues and returns it along with the flow it came from and the
    /// stats-relevant events observed along the way. Returns `None` if
    /// every list is empty or every head flow is paced ahead of `now` (in
    /// which case the relevant flows have been moved into `throttle`).
    pub(crate) fn dequeue<P: Packet>(
        &mut self,
        table: &mut FlowTable<P>,
        throttle: &mut ThrottleSet,
        cfg: &Config,
        now: Nanosecs,
    ) -> Option<(FlowHandle, ListKind, Timestamped<P>, DequeueEvents)> {
        let mut events = DequeueEvents::default();

        loop {
            let kind = if self.flipflag && !self.co_list.is_empty() {
                ListKind::Co
            } else if !self.new_list.is_empty() {
                ListKind::New
            } else if !self.old_list.is_empty() {
                ListKind::Old
            } else if !self.co_list.is_empty() {
                ListKind::Co
            } else {
                return None;
            };

            let handle = *self.list_mut(kind).front()?;

            // Step (b): promote a co-flow-matching head encountered on
            // `new`/`old` straight onto `co`, then restart selection.
            if kind != ListKind::Co {
                let socket_hash = table.get(handle).map(|f| f.socket_hash);
                if socket_hash.map(|h| self.matches_co_flow(h)).unwrap_or(false) {
                    self.list_mut(kind).pop_front();
                    self.push_co(handle);
                    if let Some(flow) = table.get_mut(handle) {
                        flow.membership = Membership::Co;
                    }
                    self.ucounter = self.ucounter.saturating_add(1);
                    events.promotions += 1;
                    tracing::trace!(?handle, ucounter = self.ucounter, "co-flow promotion");
                    continue;
                }
            }

            // Step (c): arm the burst once two promotions have landed.
            if self.ucounter >= 2 && kind != ListKind::Co {
                self.flipflag = true;
                events.flips += 1;
                tracing::trace!("co-flow burst armed");
                continue;
            }

            // Step (d): the burst has fully drained.
            if self.ucounter == 0 && kind == ListKind::Co {
                self.flipflag = false;
                events.flips += 1;
                tracing::trace!("co-flow burst ended");
                continue;
            }

            // Step (e): count down the burst as each co packet is visited.
            if self.flipflag && kind == ListKind::Co {
                self.ucounter = self.ucounter.saturating_sub(1);
            }

            // Step (f): credit gate.
            let credit = table.get(handle)?.credit;
            if credit <= 0 {
                if let Some(flow) = table.get_mut(handle) {
                    flow.credit += cfg.quantum.into_u64() as i64;
                    flow.membership = Membership::Old;
                }
                self.list_mut(kind).pop_front();
                self.push_old(handle);
                continue;
            }

            let Some(tts) = table.get(handle)?.peek_time_to_send() else {
                // Flow emptied without a matching dequeue (shouldn't
                // normally happen, but keep the loop well-founded).
                self.list_mut(kind).pop_front();
                self.relist_or_detach(table, handle, kind, now);
                continue;
            };

            // Step (g): EDT/pacing gate.
            let deadline = tts.max(table.get(handle)?.time_next_packet);
            if now < deadline {
                if let Some(flow) = table.get_mut(handle) {
                    flow.time_next_packet = deadline;
                    flow.membership = Membership::Throttled;
                }
                self.list_mut(kind).pop_front();
                throttle.throttle(handle, deadline);
                continue;
            }

            // Step (h): CE marking against the deadline just cleared, not
            // against whatever `flow.time_next_packet` holds afterward.
            if let Some(ce_threshold) = cfg.ce_threshold {
                if now.saturating_sub(deadline) > ce_threshold {
                    events.ce_marked = true;
                }
            }

            let flow = table.get_mut(handle)?;
            let mut packet = flow.dequeue().expect("peeked packet must still be present");
            if events.ce_marked {
                packet.packet.mark_ce();
            }
            let emptied = flow.is_empty();

            if emptied {
                self.list_mut(kind).pop_front();
                self.relist_or_detach(table, handle, kind, now);
            }
            // A flow that still has packets stays at the head of its
            // current list; it will be revisited (and its credit spent
            // further, or rotated to `old` once exhausted) on the next
            // call.

            return Some((handle, kind, packet, events));
        }
    }

    /// Charges DRR credit and applies the pacing update (§4.4 steps 4-5)
    /// for a packet that just departed `handle`.
    pub(crate) fn charge_and_pace<P: Packet>(
        &mut self,
        table: &mut FlowTable<P>,
        handle: FlowHandle,
        cfg: &Config,
        socket: Option<SocketInfo>,
        explicit_departure: bool,
        length: Bytes,
        now: Nanosecs,
    ) -> bool {
        let Some(flow) = table.get_mut(handle) else {
            return false;
        };
        flow.credit -= i64::try_from(length.into_u64()).unwrap_or(i64::MAX);

        if !cfg.rate_enable {
            return false;
        }
        apply_pacing(flow, cfg, socket, explicit_departure, length, now)
    }

    /// After a flow empties, either moves it to `old` (forced pass-through,
    /// when its own list just emptied but `old` is nonempty -- applies to
    /// both `new` and `co`, per `sch_fq.c`) or detaches it entirely.
    fn relist_or_detach<P: Packet>(
        &mut self,
        table: &mut FlowTable<P>,
        handle: FlowHandle,
        kind: ListKind,
        now: Nanosecs,
    ) {
        let pass_through = matches!(kind, ListKind::New | ListKind::Co) && !self.old_list.is_empty();
        if pass_through {
            self.old_list.push_back(handle);
            if let Some(flow) = table.get_mut(handle) {
                flow.membership = Membership::Old;
            }
        } else {
            table.mark_detached(handle, now);
        }
    }
}

/// §4.4 step 5: recomputes `flow.time_next_packet` after a packet departs.
/// Returns `true` if the packet's nominal delay had to be clamped to one
/// second (the `pkts_too_long` statistic).
fn apply_pacing<P: Packet>(
    flow: &mut FlowRecord<P>,
    cfg: &Config,
    socket: Option<SocketInfo>,
    explicit_departure: bool,
    length: Bytes,
    now: Nanosecs,
) -> bool {
    let mut rate = cfg.flow_max_rate;
    let mut plen = length;

    if !explicit_departure {
        if let Some(socket) = socket {
            rate = rate.min(socket.pacing_rate);
        }
        if rate <= cfg.low_rate_threshold {
            flow.credit = 0;
        } else {
            plen = plen.max(cfg.quantum);
            if flow.credit > 0 {
                return false;
            }
        }
    }

    if rate == BytesPerSec::MAX {
        return false;
    }

    let mut delay = rate.length(plen);
    let mut too_long = false;
    if delay > Nanosecs::new(1_000_000_000) {
        delay = Nanosecs::new(1_000_000_000);
        too_long = true;
    }

    if flow.time_next_packet != Nanosecs::ZERO && now >= flow.time_next_packet {
        let drift = now.saturating_sub(flow.time_next_packet);
        delay = delay.saturating_sub(delay.checked_div(2).unwrap_or(Nanosecs::ZERO).min(drift));
    }
    flow.time_next_packet = now.saturating_add(delay);
    too_long
}
