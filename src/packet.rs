//! The packet accessor surface the scheduler needs from the host's own
//! packet representation.

use std::cmp::Ordering;

use crate::{key::SocketInfo, units::Bytes, units::Nanosecs};

/// Priority band reserved for control traffic; packets in this band bypass
/// normal DRR scheduling via the internal flow (§5).
pub const PRIO_CONTROL: u8 = 0;

/// The read-only view the scheduler needs of a host packet. The host's own
/// packet type implements this directly; the scheduler never constructs,
/// clones the payload of, or otherwise interprets a packet beyond these
/// accessors.
pub trait Packet: std::fmt::Debug {
    /// On-wire length, used for DRR credit accounting and byte-limit
    /// admission control.
    fn length(&self) -> Bytes;

    /// Priority band. `PRIO_CONTROL` packets are served by the internal
    /// flow ahead of everything else.
    fn priority(&self) -> u8;

    /// Earliest permissible departure time, or `Nanosecs::ZERO` if the
    /// caller has no opinion (in which case the scheduler stamps it with
    /// the enqueue-time `now`, per §3). Used both for per-flow EDT ordering
    /// and, when set explicitly, for pacing.
    fn departure_time(&self) -> Nanosecs;

    /// The socket this packet belongs to, if classification found one.
    fn socket(&self) -> Option<SocketInfo>;

    /// Flow hash, used to key flows with no attached socket and to derive
    /// the bucket index regardless of key kind.
    fn hash(&self) -> u32;

    /// Marks the packet ECN-CE, called when a packet departs more than
    /// `Config::ce_threshold` late. Optional: hosts whose packet type has no
    /// ECN field, or that choose not to mark, can leave this a no-op; the
    /// `ce_mark` statistic is counted either way.
    fn mark_ce(&mut self) {}
}

/// Wraps a packet with its effective send time and an arrival sequence
/// number. The send time is computed once at enqueue (stamped to `now` if
/// the packet named none) rather than read repeatedly off
/// `Packet::departure_time()`, which the host's packet type cannot be
/// mutated to reflect. `explicit_departure` records whether that stamp was
/// the caller's own value or a scheduler-assigned one, which the pacing
/// calculation (`engine::apply_pacing`) treats differently.
#[derive(Debug)]
pub(crate) struct Timestamped<P> {
    pub(crate) seq: u64,
    pub(crate) time_to_send: Nanosecs,
    pub(crate) explicit_departure: bool,
    pub(crate) packet: P,
}

impl<P> Timestamped<P> {
    fn key(&self) -> (Nanosecs, u64) {
        (self.time_to_send, self.seq)
    }
}

impl<P: Packet> PartialEq for Timestamped<P> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<P: Packet> Eq for Timestamped<P> {}

impl<P: Packet> PartialOrd for Timestamped<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Packet> Ord for Timestamped<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
