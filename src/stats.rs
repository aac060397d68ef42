//! Statistics exposed by the scheduler (§6).

/// Cumulative and point-in-time counters exported alongside the scheduler.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    /// Flows currently present in the table (active + detached).
    pub flows: u64,
    /// Flows currently detached (idle, empty, GC-eligible once under
    /// pressure).
    pub inactive_flows: u64,
    /// Flows currently paced (present in the throttle set).
    pub throttled_flows: u64,

    /// Packets currently queued across all flows.
    pub backlog_packets: u64,
    /// Bytes currently queued across all flows.
    pub backlog_bytes: u64,

    /// Packets dropped for exceeding the total packet limit.
    pub drops_overlimit: u64,
    /// Packets dropped for exceeding a single flow's packet limit.
    pub drops_flow_limit: u64,
    /// Packets dropped because their departure time exceeded the
    /// configured horizon.
    pub drops_horizon: u64,
    /// Packets admitted with their departure time capped to the horizon
    /// instead of dropped (`Config::horizon_drop == false`).
    pub horizon_caps: u64,
    /// Packets admitted via the allocation-failure degraded path (served
    /// by the internal flow instead of their real flow).
    pub allocation_failures: u64,
    /// Control-priority packets served through the internal flow,
    /// bypassing normal DRR scheduling.
    pub highprio_packets: u64,

    /// Packets ECN-marked for departing more than `Config::ce_threshold`
    /// late, instead of being dropped outright.
    pub ce_marked: u64,
    /// Packets whose pacing delay was clamped to the one-second cap
    /// because the computed delay would otherwise have exceeded it.
    pub pkts_too_long: u64,

    /// Times a flow was promoted into the co-flow priority list.
    pub co_flow_promotions: u64,
    /// Times the co-flow burst flag flipped (entered or left burst mode).
    pub co_flow_flips: u64,

    /// Times the flow table was resized.
    pub resizes: u64,
    /// Times lazy garbage collection ran and actually reclaimed flows.
    pub gc_runs: u64,
    /// Total flows reclaimed across all GC runs.
    pub gc_reclaimed: u64,

    /// Smoothed nanoseconds between a throttled flow becoming eligible and
    /// actually being serviced.
    pub unthrottle_latency_ns: i64,
    /// Nanoseconds from now until the next throttled flow becomes
    /// eligible, offset by `Config::timer_slack`, or `None` if no flow is
    /// currently throttled.
    pub time_next_delayed_flow_ns: Option<u64>,
}
