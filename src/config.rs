//! Scheduler configuration: the full option table (§6) plus the sparse
//! patch type and validation used by `Scheduler::change()`.

use typed_builder::TypedBuilder;

use crate::{
    error::ConfigError,
    units::{Bytes, BytesPerSec, Nanosecs},
};

/// Up to two source (or destination) ports, used both for the live co-flow
/// promotion ports and for the reserved-but-unconsulted destination-port
/// pair (§6, §9 Open Questions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoFlowPorts {
    pub first: Option<u16>,
    pub second: Option<u16>,
}

/// Full scheduler configuration, constructed once via the builder and
/// mutated only through validated `ConfigPatch`es thereafter.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Config {
    /// DRR quantum, in bytes, credited to a flow each time it is revisited.
    #[builder(default = Bytes::new(2 * 1514))]
    pub quantum: Bytes,

    /// Credit a freshly classified (or socket-reuse-refreshed) flow starts
    /// with, independent of `quantum`.
    #[builder(default = Bytes::new(10 * 1514))]
    pub initial_quantum: Bytes,

    /// log2 of the flow table's bucket count.
    #[builder(default = 10)]
    pub buckets_log: u8,

    /// Maximum packets admitted across all flows.
    #[builder(default = 10_000)]
    pub plimit: u32,

    /// Maximum packets admitted to any single flow.
    #[builder(default = 100)]
    pub flow_plimit: u32,

    /// Packets whose departure time is more than this far in the future
    /// are subject to `horizon_drop`.
    #[builder(default = Nanosecs::new(10_000_000_000))]
    pub horizon: Nanosecs,

    /// If true, packets beyond `horizon` are dropped; if false, their
    /// departure time is capped to `now + horizon` instead.
    #[builder(default = true)]
    pub horizon_drop: bool,

    /// If set, packets whose queueing delay would exceed this threshold are
    /// CE-marked (when the host's packet type supports marking) instead of
    /// being dropped outright. `None` models the original's "4294 seconds",
    /// i.e. effectively never.
    #[builder(default, setter(strip_option))]
    pub ce_threshold: Option<Nanosecs>,

    /// Enables per-flow pacing. When disabled, packets depart as soon as
    /// DRR credit and each packet's own departure time allow.
    #[builder(default = true)]
    pub rate_enable: bool,

    /// Global cap on any one flow's departure rate, in bytes/s. `BytesPerSec::MAX`
    /// (the default) disables the cap.
    #[builder(default = BytesPerSec::MAX)]
    pub flow_max_rate: BytesPerSec,

    /// Below this rate, pacing zeroes a flow's credit outright rather than
    /// computing a delay, to avoid scheduling a storm of tiny, barely-paced
    /// packets.
    #[builder(default = BytesPerSec::new(550_000 / 8))]
    pub low_rate_threshold: BytesPerSec,

    /// How long a flow must stay idle (detached) before re-admission
    /// refreshes its credit up to at least `quantum`.
    #[builder(default = Nanosecs::new(40_000_000))]
    pub flow_refill_delay: Nanosecs,

    /// Mask applied to a packet's hash when synthesizing a key for
    /// orphaned (socketless, listener, or closed-socket) traffic.
    #[builder(default = 1023)]
    pub orphan_mask: u32,

    /// Slack passed to `Watchdog::arm`, allowing the host to coalesce the
    /// pacing timer with other nearby deadlines.
    #[builder(default = Nanosecs::new(10_000))]
    pub timer_slack: Nanosecs,

    /// Co-flow priority promotion ports.
    #[builder(default)]
    pub co_flow_ports: CoFlowPorts,

    /// Reserved destination-port pair: configured and surfaced through
    /// `Stats`/dumps in the original but never consulted during selection
    /// (§9 Open Questions). Kept for config-surface parity, not load-bearing.
    #[builder(default)]
    pub co_flow_dest_ports: CoFlowPorts,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        validate_quantum(self.quantum)?;
        validate_buckets_log(self.buckets_log)?;
        if self.plimit == 0 {
            return Err(ConfigError::InvalidPlimit);
        }
        Ok(())
    }
}

fn validate_quantum(quantum: Bytes) -> Result<(), ConfigError> {
    let v = quantum.into_u64();
    if v == 0 || v > (1 << 20) {
        return Err(ConfigError::InvalidQuantum(v));
    }
    Ok(())
}

fn validate_buckets_log(buckets_log: u8) -> Result<(), ConfigError> {
    // Mirrors `fq_change()`'s `nval <= ilog2(256 * 1024)` bound.
    if buckets_log == 0 || buckets_log > 18 {
        return Err(ConfigError::InvalidBucketsLog(buckets_log));
    }
    Ok(())
}

/// A sparse configuration update: only present fields are validated and
/// applied, mirroring netlink `change` semantics (only attributes present
/// in the message are touched) without modeling netlink itself.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct ConfigPatch {
    pub quantum: Option<Bytes>,
    pub initial_quantum: Option<Bytes>,
    pub buckets_log: Option<u8>,
    pub plimit: Option<u32>,
    pub flow_plimit: Option<u32>,
    pub horizon: Option<Nanosecs>,
    pub horizon_drop: Option<bool>,
    pub ce_threshold: Option<Nanosecs>,
    pub rate_enable: Option<bool>,
    pub flow_max_rate: Option<BytesPerSec>,
    pub low_rate_threshold: Option<BytesPerSec>,
    pub flow_refill_delay: Option<Nanosecs>,
    pub orphan_mask: Option<u32>,
    pub timer_slack: Option<Nanosecs>,
    pub co_flow_ports: Option<CoFlowPorts>,
    pub co_flow_dest_ports: Option<CoFlowPorts>,
}

impl ConfigPatch {
    /// Validates every present field without mutating `base`. Returns the
    /// would-be-resulting config on success so the caller can apply it
    /// atomically.
    pub(crate) fn validate_against(&self, base: &Config) -> Result<Config, ConfigError> {
        let mut next = base.clone();
        if let Some(q) = self.quantum {
            validate_quantum(q)?;
            next.quantum = q;
        }
        if let Some(q) = self.initial_quantum {
            next.initial_quantum = q;
        }
        if let Some(log) = self.buckets_log {
            validate_buckets_log(log)?;
            next.buckets_log = log;
        }
        if let Some(p) = self.plimit {
            if p == 0 {
                return Err(ConfigError::InvalidPlimit);
            }
            next.plimit = p;
        }
        if let Some(p) = self.flow_plimit {
            next.flow_plimit = p;
        }
        if let Some(h) = self.horizon {
            next.horizon = h;
        }
        if let Some(d) = self.horizon_drop {
            next.horizon_drop = d;
        }
        if let Some(t) = self.ce_threshold {
            next.ce_threshold = Some(t);
        }
        if let Some(r) = self.rate_enable {
            next.rate_enable = r;
        }
        if let Some(r) = self.flow_max_rate {
            next.flow_max_rate = r;
        }
        if let Some(r) = self.low_rate_threshold {
            next.low_rate_threshold = r;
        }
        if let Some(d) = self.flow_refill_delay {
            next.flow_refill_delay = d;
        }
        if let Some(m) = self.orphan_mask {
            next.orphan_mask = m;
        }
        if let Some(s) = self.timer_slack {
            next.timer_slack = s;
        }
        if let Some(ports) = self.co_flow_ports {
            next.co_flow_ports = ports;
        }
        if let Some(ports) = self.co_flow_dest_ports {
            next.co_flow_dest_ports = ports;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::builder().build().validate().is_ok());
    }

    #[test]
    fn zero_quantum_is_rejected() {
        let base = Config::builder().build();
        let patch = ConfigPatch::builder().quantum(Bytes::ZERO).build();
        assert!(matches!(
            patch.validate_against(&base),
            Err(ConfigError::InvalidQuantum(0))
        ));
    }

    #[test]
    fn buckets_log_out_of_range_is_rejected() {
        let base = Config::builder().build();
        let patch = ConfigPatch::builder().buckets_log(0u8).build();
        assert!(patch.validate_against(&base).is_err());
    }

    #[test]
    fn buckets_log_eighteen_is_accepted() {
        let base = Config::builder().build();
        let patch = ConfigPatch::builder().buckets_log(18u8).build();
        assert!(patch.validate_against(&base).is_ok());
    }

    #[test]
    fn patch_does_not_mutate_base_on_error() {
        let base = Config::builder().build();
        let original_quantum = base.quantum;
        let patch = ConfigPatch::builder().quantum(Bytes::ZERO).build();
        let _ = patch.validate_against(&base);
        assert_eq!(base.quantum, original_quantum);
    }
}
