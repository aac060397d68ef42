//! The public scheduler façade: `enqueue`/`dequeue`/`change`/`reset`.

use std::collections::VecDeque;

use crate::{
    config::{Config, ConfigPatch},
    engine::Engine,
    error::Error,
    host::{Clock, Watchdog},
    key::{FlowKey, SocketState},
    packet::PRIO_CONTROL,
    stats::Stats,
    table::FlowTable,
    throttle::ThrottleSet,
    units::Nanosecs,
    Packet,
};

/// Why a packet handed to `enqueue` was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The total packet limit (`Config::plimit`) was reached.
    LimitExceeded,
    /// The owning flow's packet limit (`Config::flow_plimit`) was reached.
    FlowLimitExceeded,
    /// The packet's departure time is further in the future than
    /// `Config::horizon` allows, and `Config::horizon_drop` is set.
    Horizon,
}

/// The result of `Scheduler::enqueue`.
#[derive(Debug)]
pub enum EnqueueOutcome<P> {
    /// The packet was admitted.
    Admitted,
    /// The packet was not admitted and is handed back to the caller.
    Dropped(P, DropReason),
}

/// A Fair Queue scheduler instance. Not thread-safe: the host is expected
/// to serialize `enqueue`/`dequeue`/`change` calls under one external lock,
/// mirroring the single qdisc-tree lock the source relies on (§1).
pub struct Scheduler<P, C, W> {
    config: Config,
    table: FlowTable<P>,
    throttle: ThrottleSet,
    engine: Engine,
    /// Control-priority (`PRIO_CONTROL`) bypass queue: a plain FIFO, not a
    /// flow's `FlowQueue` -- the internal flow has no EDT ordering or DRR
    /// credit of its own, it is simply served ahead of everything else
    /// (§4.4 step 1).
    internal: VecDeque<P>,
    clock: C,
    watchdog: W,
    stats: Stats,
}

impl<P: Packet, C: Clock, W: Watchdog> Scheduler<P, C, W> {
    /// Constructs a scheduler. Infallible: an out-of-range `Config` is only
    /// rejected by `change()`, never at construction (§7).
    pub fn new(config: Config, clock: C, watchdog: W) -> Self {
        let table = FlowTable::new(config.buckets_log);
        Self {
            config,
            table,
            throttle: ThrottleSet::default(),
            engine: Engine::default(),
            internal: VecDeque::new(),
            clock,
            watchdog,
            stats: Stats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        let mut stats = self.stats;
        stats.flows = self.table.total_flows() as u64;
        stats.inactive_flows = self.table.inactive_flows() as u64;
        stats.unthrottle_latency_ns = self.throttle.unthrottle_latency_ns();
        stats.throttled_flows = self.throttle.len() as u64;
        stats.time_next_delayed_flow_ns = self.throttle.next_deadline().map(|d| {
            d.into_u64()
                .saturating_sub(self.clock.now().into_u64())
                .saturating_add(self.config.timer_slack.into_u64())
        });
        stats
    }

    /// Admits `packet`, classifying it into a flow and placing it onto the
    /// appropriate service list. Returns the packet back to the caller (with
    /// a reason) if it could not be admitted -- every packet handed in is
    /// accounted for, never silently eaten (§8 P1).
    pub fn enqueue(&mut self, packet: P) -> EnqueueOutcome<P> {
        if packet.priority() == PRIO_CONTROL {
            self.internal.push_back(packet);
            self.stats.backlog_packets += 1;
            self.stats.highprio_packets += 1;
            return EnqueueOutcome::Admitted;
        }

        if self.stats.backlog_packets >= u64::from(self.config.plimit) {
            self.stats.drops_overlimit += 1;
            return EnqueueOutcome::Dropped(packet, DropReason::LimitExceeded);
        }

        let now = self.clock.now();
        let explicit_departure = packet.departure_time() != Nanosecs::ZERO;
        let mut time_to_send = if explicit_departure { packet.departure_time() } else { now };
        if explicit_departure && time_to_send > now.saturating_add(self.config.horizon) {
            if self.config.horizon_drop {
                self.stats.drops_horizon += 1;
                tracing::warn!(departure = ?packet.departure_time(), "packet dropped: past horizon");
                return EnqueueOutcome::Dropped(packet, DropReason::Horizon);
            }
            time_to_send = now.saturating_add(self.config.horizon);
            self.stats.horizon_caps += 1;
        }

        let raw_hash = packet.hash();
        let orphan_hash = raw_hash & self.config.orphan_mask;
        let socket = packet.socket();
        let (key, socket_identity_hash) = match socket {
            Some(info) if info.state == SocketState::Connected => {
                (FlowKey::Socket(info.id), Some(info.hash))
            }
            _ => (FlowKey::Hash(orphan_hash), None),
        };

        let classified = self.table.classify(
            key,
            key.bucket_hash(),
            socket_identity_hash,
            self.config.initial_quantum,
            now,
        );

        if classified.allocation_failed {
            self.stats.allocation_failures += 1;
            self.internal.push_back(packet);
            self.stats.backlog_packets += 1;
            return EnqueueOutcome::Admitted;
        }
        let handle = classified.handle;

        if classified.refreshed {
            tracing::debug!(?handle, "flow refreshed: socket identity reused");
            if let Some(old_deadline) = classified.was_throttled {
                self.throttle.remove(handle, old_deadline);
                self.engine.unthrottle(&mut self.table, handle);
            }
        }
        if classified.gc_reclaimed > 0 {
            self.stats.gc_runs += 1;
            self.stats.gc_reclaimed += classified.gc_reclaimed as u64;
        }

        if let Some(flow) = self.table.get(handle) {
            if flow.qlen >= self.config.flow_plimit {
                self.stats.drops_flow_limit += 1;
                return EnqueueOutcome::Dropped(packet, DropReason::FlowLimitExceeded);
            }
        }

        let length = packet.length();
        let was_detached = self
            .table
            .get(handle)
            .map(|f| f.is_detached())
            .unwrap_or(classified.created);
        let detached_since = self.table.get(handle).and_then(|f| f.detached_since());

        if let Some(flow) = self.table.get_mut(handle) {
            flow.enqueue(time_to_send, explicit_departure, orphan_hash, packet);
        }
        self.engine
            .capture_co_flow_identity(&self.config.co_flow_ports, socket, orphan_hash);

        if was_detached {
            if let Some(since) = detached_since {
                if now.saturating_sub(since) > self.config.flow_refill_delay {
                    if let Some(flow) = self.table.get_mut(handle) {
                        let quantum = self.config.quantum.into_u64() as i64;
                        flow.credit = flow.credit.max(quantum);
                    }
                }
            }
            self.table.mark_active(handle, true);
            self.engine.admit(&mut self.table, handle);
        }

        self.stats.backlog_packets += 1;
        self.stats.backlog_bytes += length.into_u64();
        EnqueueOutcome::Admitted
    }

    /// Draws the next packet ready to depart, or `None` if nothing is
    /// ready right now (in which case the watchdog has been (re)armed for
    /// the next eligible time, if any flow is throttled).
    pub fn dequeue(&mut self) -> Option<P> {
        if let Some(packet) = self.internal.pop_front() {
            self.stats.backlog_packets = self.stats.backlog_packets.saturating_sub(1);
            self.stats.backlog_bytes = self.stats.backlog_bytes.saturating_sub(packet.length().into_u64());
            return Some(packet);
        }

        let now = self.clock.now();
        for handle in self.throttle.drain_ready(now) {
            self.engine.unthrottle(&mut self.table, handle);
        }

        let result = self
            .engine
            .dequeue(&mut self.table, &mut self.throttle, &self.config, now);

        let packet = result.map(|(handle, _kind, timestamped, events)| {
            self.stats.co_flow_promotions += u64::from(events.promotions);
            self.stats.co_flow_flips += u64::from(events.flips);
            if events.ce_marked {
                self.stats.ce_marked += 1;
            }

            let socket = timestamped.packet.socket();
            let length = timestamped.packet.length();
            let too_long = self.engine.charge_and_pace(
                &mut self.table,
                handle,
                &self.config,
                socket,
                timestamped.explicit_departure,
                length,
                now,
            );
            if too_long {
                self.stats.pkts_too_long += 1;
            }
            timestamped.packet
        });

        match self.throttle.next_deadline() {
            Some(deadline) => self.watchdog.arm(deadline),
            None => self.watchdog.disarm(),
        }

        if let Some(ref p) = packet {
            self.stats.backlog_bytes = self.stats.backlog_bytes.saturating_sub(p.length().into_u64());
            self.stats.backlog_packets = self.stats.backlog_packets.saturating_sub(1);
        }
        packet
    }

    /// Validates and atomically applies a configuration patch, resizing the
    /// flow table if `buckets_log` changed, then draining any backlog in
    /// excess of a newly-lowered `plimit` (§7, `fq_change()`).
    pub fn change(&mut self, patch: ConfigPatch) -> Result<(), Error> {
        let next = patch.validate_against(&self.config)?;
        let resize_needed = next.buckets_log != self.config.buckets_log;
        self.config = next;

        if resize_needed {
            let now = self.clock.now();
            self.table.resize(self.config.buckets_log, now)?;
            self.stats.resizes += 1;
        }

        while self.stats.backlog_packets > u64::from(self.config.plimit) {
            if self.dequeue().is_none() {
                break;
            }
        }

        let now = self.clock.now();
        let reclaimed = self.table.gc_sweep_all(now);
        if reclaimed > 0 {
            self.stats.gc_runs += 1;
            self.stats.gc_reclaimed += reclaimed as u64;
        }

        Ok(())
    }

    /// Drops every queued packet and forgets every flow, keeping the
    /// current configuration.
    pub fn reset(&mut self) {
        self.table = FlowTable::new(self.config.buckets_log);
        self.throttle = ThrottleSet::default();
        self.engine = Engine::default();
        self.internal = VecDeque::new();
        self.watchdog.disarm();
        self.stats = Stats::default();
    }

    /// Consumes the scheduler, returning its final statistics snapshot.
    pub fn destroy(self) -> Stats {
        self.stats()
    }
}
