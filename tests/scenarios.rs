//! Scenario and property tests driving a `Scheduler` end-to-end through a
//! small fake clock/packet/watchdog harness, in the style of the teacher's
//! `tests/ideal_fct.rs` integration test.

use std::cell::Cell;

use anyhow::{Context, Result};
use fq_core::{
    config::{CoFlowPorts, Config, ConfigPatch},
    host::{Clock, Watchdog},
    key::{SocketInfo, SocketState},
    units::{Bytes, BytesPerSec, Nanosecs},
    DropReason, EnqueueOutcome, Packet, Scheduler, SocketId,
};

#[derive(Debug, Clone, Copy)]
struct FakePacket {
    id: u64,
    length: Bytes,
    priority: u8,
    departure_time: Nanosecs,
    socket: Option<SocketInfo>,
    hash: u32,
}

impl FakePacket {
    fn new(id: u64, flow: u64, len: u64, departure_ns: u64) -> Self {
        Self {
            id,
            length: Bytes::new(len),
            priority: 1,
            departure_time: Nanosecs::new(departure_ns),
            socket: Some(SocketInfo {
                id: SocketId(flow),
                source_port: 0,
                hash: flow as u32,
                pacing_rate: BytesPerSec::MAX,
                state: SocketState::Connected,
            }),
            hash: flow as u32,
        }
    }

    fn with_port(mut self, port: u16) -> Self {
        self.socket = self.socket.map(|s| SocketInfo { source_port: port, ..s });
        self
    }

    fn control(id: u64) -> Self {
        Self {
            id,
            length: Bytes::new(40),
            priority: 0,
            departure_time: Nanosecs::ZERO,
            socket: None,
            hash: 0,
        }
    }
}

impl Packet for FakePacket {
    fn length(&self) -> Bytes {
        self.length
    }
    fn priority(&self) -> u8 {
        self.priority
    }
    fn departure_time(&self) -> Nanosecs {
        self.departure_time
    }
    fn socket(&self) -> Option<SocketInfo> {
        self.socket
    }
    fn hash(&self) -> u32 {
        self.hash
    }
}

#[derive(Debug, Default)]
struct FakeClock(Cell<u64>);

impl FakeClock {
    fn advance_to(&self, ns: u64) {
        self.0.set(ns);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Nanosecs {
        Nanosecs::new(self.0.get())
    }
}

#[derive(Debug, Default)]
struct RecordingWatchdog {
    armed: Vec<Nanosecs>,
    disarmed: u32,
}

impl Watchdog for RecordingWatchdog {
    fn arm(&mut self, deadline: Nanosecs) {
        self.armed.push(deadline);
    }
    fn disarm(&mut self) {
        self.disarmed += 1;
    }
}

fn scheduler_with(config: Config) -> Scheduler<FakePacket, FakeClock, RecordingWatchdog> {
    Scheduler::new(config, FakeClock::default(), RecordingWatchdog::default())
}

#[test]
fn drr_alternates_between_equal_flows() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().quantum(Bytes::new(1_000)).build());

    for i in 0..4 {
        sched.enqueue(FakePacket::new(i, 1, 500, 0));
        sched.enqueue(FakePacket::new(100 + i, 2, 500, 0));
    }

    let mut order = Vec::new();
    while let Some(pkt) = sched.dequeue() {
        order.push(pkt.id);
    }

    // Both flows get serviced; neither starves the other over the run.
    let flow1 = order.iter().filter(|&&id| id < 100).count();
    let flow2 = order.iter().filter(|&&id| id >= 100).count();
    assert_eq!(flow1, 4);
    assert_eq!(flow2, 4);
    Ok(())
}

#[test]
fn conservation_every_admitted_packet_is_eventually_dequeued() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().build());
    let mut admitted = 0u64;
    for i in 0..20 {
        if let EnqueueOutcome::Admitted = sched.enqueue(FakePacket::new(i, i % 3, 100, 0)) {
            admitted += 1;
        }
    }

    let mut drained = 0u64;
    while sched.dequeue().is_some() {
        drained += 1;
    }

    assert_eq!(admitted, drained, "no admitted packet may vanish");
    assert_eq!(sched.stats().backlog_packets, 0);
    Ok(())
}

#[test]
fn per_flow_packet_limit_drops_excess_from_one_flow() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().flow_plimit(2).build());

    assert!(matches!(
        sched.enqueue(FakePacket::new(0, 1, 100, 0)),
        EnqueueOutcome::Admitted
    ));
    assert!(matches!(
        sched.enqueue(FakePacket::new(1, 1, 100, 0)),
        EnqueueOutcome::Admitted
    ));
    let third = sched.enqueue(FakePacket::new(2, 1, 100, 0));
    match third {
        EnqueueOutcome::Dropped(_, DropReason::FlowLimitExceeded) => {}
        other => panic!("expected flow-limit drop, got {other:?}"),
    }
    assert_eq!(sched.stats().drops_flow_limit, 1);
    Ok(())
}

#[test]
fn total_packet_limit_drops_regardless_of_flow() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().plimit(2).build());
    sched.enqueue(FakePacket::new(0, 1, 100, 0));
    sched.enqueue(FakePacket::new(1, 2, 100, 0));
    let third = sched.enqueue(FakePacket::new(2, 3, 100, 0));
    assert!(matches!(
        third,
        EnqueueOutcome::Dropped(_, DropReason::LimitExceeded)
    ));
    Ok(())
}

#[test]
fn control_priority_packets_bypass_normal_scheduling() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().build());
    sched.enqueue(FakePacket::new(0, 1, 100, 0));
    sched.enqueue(FakePacket::control(999));

    let first = sched.dequeue().context("expected a packet")?;
    assert_eq!(first.id, 999, "control traffic must be served first");
    Ok(())
}

#[test]
fn pacing_throttles_a_flow_until_its_departure_time() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().rate_enable(true).build());
    sched.enqueue(FakePacket::new(0, 1, 100, 5_000));

    assert!(
        sched.dequeue().is_none(),
        "packet paced into the future must not depart early"
    );

    // Nothing else to serve at time 0, so the watchdog stays armed but the
    // scheduler itself reports no ready packet.
    assert_eq!(sched.stats().backlog_packets, 1);
    Ok(())
}

#[test]
fn edt_reorder_within_a_single_flow() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().build());

    sched.enqueue(FakePacket::new(0, 1, 100, 200));
    sched.enqueue(FakePacket::new(1, 1, 100, 100));
    sched.enqueue(FakePacket::new(2, 1, 100, 150));

    let mut order = Vec::new();
    while let Some(pkt) = sched.dequeue() {
        order.push(pkt.id);
    }

    assert_eq!(order, vec![1, 2, 0], "a flow must depart in EDT order, not arrival order");
    Ok(())
}

#[test]
fn horizon_drop_and_cap_variants() -> Result<()> {
    let far_future = 2_000_000_000;

    let mut dropping = scheduler_with(
        Config::builder()
            .horizon(Nanosecs::new(1_000_000_000))
            .horizon_drop(true)
            .build(),
    );
    let outcome = dropping.enqueue(FakePacket::new(0, 1, 100, far_future));
    assert!(matches!(outcome, EnqueueOutcome::Dropped(_, DropReason::Horizon)));
    assert_eq!(dropping.stats().drops_horizon, 1);

    let mut capping = scheduler_with(
        Config::builder()
            .horizon(Nanosecs::new(1_000_000_000))
            .horizon_drop(false)
            .build(),
    );
    let outcome = capping.enqueue(FakePacket::new(0, 1, 100, far_future));
    assert!(matches!(outcome, EnqueueOutcome::Admitted));
    assert_eq!(capping.stats().horizon_caps, 1);

    let pkt = capping.dequeue().context("capped packet should still depart")?;
    assert_eq!(pkt.id, 0);
    Ok(())
}

#[test]
fn co_flow_promotion_overrides_normal_drr_order() -> Result<()> {
    let ports = CoFlowPorts {
        first: Some(7001),
        second: Some(7002),
    };
    let mut sched = scheduler_with(Config::builder().co_flow_ports(ports).build());

    // A bulk flow gets there first and would normally be serviced before
    // the co-flow members under plain DRR.
    sched.enqueue(FakePacket::new(0, 1, 100, 0));

    // Two packets from distinct co-flow-eligible ports: once both source
    // ports have been observed, the flows are promoted into the co list
    // when the selection loop reaches their head -- at dequeue time, not
    // at enqueue time.
    sched.enqueue(FakePacket::new(1, 2, 100, 0).with_port(7001));
    sched.enqueue(FakePacket::new(2, 3, 100, 0).with_port(7002));

    let first = sched.dequeue().context("expected the bulk flow's packet")?;
    assert_eq!(first.id, 0, "the bulk flow was already at the head of new");

    let second = sched.dequeue().context("expected a promoted co-flow packet")?;
    assert!(
        second.id == 1 || second.id == 2,
        "co-flow members must be served once promoted"
    );

    assert!(sched.stats().co_flow_promotions >= 1);
    Ok(())
}

#[test]
fn lazy_gc_reclaims_detached_flows_under_pressure() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().buckets_log(1).build());

    // Churn far more flows through than buckets, each sent then fully
    // drained, to push the table over the GC pressure threshold.
    for flow in 0..20u64 {
        sched.enqueue(FakePacket::new(flow, flow, 64, 0));
        sched.dequeue();
    }
    assert!(sched.stats().flows > 0);

    // `change` (a no-op patch) is the trigger point that runs GC in this
    // implementation.
    sched.change(ConfigPatch::builder().build())?;
    assert_eq!(
        sched.stats().flows, 0,
        "every flow was detached and empty, so gc should reclaim all of them"
    );
    Ok(())
}

#[test]
fn change_rejects_invalid_quantum_without_mutating_config() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().build());
    let original = sched.config().quantum;

    let result = sched.change(ConfigPatch::builder().quantum(Bytes::ZERO).build());
    assert!(result.is_err());
    assert_eq!(sched.config().quantum, original);
    Ok(())
}

#[test]
fn change_drains_backlog_down_to_a_lowered_plimit() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().plimit(10).build());
    for i in 0..5u64 {
        sched.enqueue(FakePacket::new(i, i, 64, 0));
    }
    assert_eq!(sched.stats().backlog_packets, 5);

    sched.change(ConfigPatch::builder().plimit(2u32).build())?;
    assert!(sched.stats().backlog_packets <= 2);
    Ok(())
}

#[test]
fn resize_preserves_classification_across_bucket_counts() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().buckets_log(2).build());

    for flow in 0..8u64 {
        sched.enqueue(FakePacket::new(flow, flow, 64, 0));
    }
    assert_eq!(sched.stats().flows, 8);

    sched.change(ConfigPatch::builder().buckets_log(6u8).build())?;
    assert_eq!(
        sched.stats().flows,
        8,
        "resizing to more buckets must not lose or duplicate any live flow"
    );

    // Re-enqueuing onto an already-known flow after the resize must still
    // land on the same flow rather than allocating a duplicate, which only
    // holds if the rehash bucketed it the same way `classify` originally did.
    sched.enqueue(FakePacket::new(100, 0, 64, 0));
    assert_eq!(sched.stats().flows, 8);
    Ok(())
}

#[test]
fn reset_clears_all_state_but_keeps_config() -> Result<()> {
    let mut sched = scheduler_with(Config::builder().plimit(5).build());
    sched.enqueue(FakePacket::new(0, 1, 64, 0));
    sched.reset();
    assert_eq!(sched.stats().backlog_packets, 0);
    assert_eq!(sched.stats().flows, 0);
    assert_eq!(sched.config().plimit, 5);
    Ok(())
}
