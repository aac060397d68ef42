//! Flow identity: the key a packet's owning socket (real or synthesized)
//! is classified under.

use std::cmp::Ordering;

use crate::units::BytesPerSec;

/// A stand-in for "the socket a packet belongs to". The host's packet type
/// exposes one of these through `Packet::socket()`; when absent, the flow
/// is keyed purely by `Packet::hash()` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketInfo {
    /// Opaque per-socket identity. Stable for the socket's lifetime.
    pub id: SocketId,
    /// The source port the co-flow mechanism keys promotion on.
    pub source_port: u16,
    /// `sk->sk_hash` in the original: a long-lived identity hash used only
    /// to detect socket reuse (a new socket landing at a recycled address),
    /// distinct from `Packet::hash()` which keys orphaned/synthetic flows.
    pub hash: u32,
    /// The transport's own pacing rate (`sk_pacing_rate`), consulted
    /// alongside `Config::flow_max_rate` when pacing a packet that carries
    /// no explicit departure time.
    pub pacing_rate: BytesPerSec,
    /// Connection state, used to decide whether this packet's socket counts
    /// as a real flow identity or should be treated as orphaned (keyed by
    /// hash instead), matching `fq_classify()`'s listener/`TCP_CLOSE` checks.
    pub state: SocketState,
}

/// Connection state relevant to classification (§4.1): only a connected
/// socket is used as a flow identity. Listeners and closed sockets are
/// treated as orphaned traffic and keyed by hash instead, the same way
/// SYNACKs riding a listener socket or connectionless UDP sends are in the
/// original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// A fully established socket; used directly as the flow key.
    Connected,
    /// A listening socket (e.g. carrying a SYNACK) -- treated as orphaned.
    Listening,
    /// `TCP_CLOSE`, the state connectionless (e.g. UDP) sockets report --
    /// treated as orphaned.
    Closed,
}

/// Opaque socket identity, stands in for the original's raw socket pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

/// The key a flow is classified and ordered under within a hash bucket.
///
/// Mirrors `fq_classify()`'s choice between a real socket and a
/// hash-synthesized pseudo-socket: the two key spaces are disjoint (a real
/// `SocketId` and a `Hash` can never collide) by tagging the low bit of the
/// value used for ordering, exactly as the source packs `(hash << 1) | 1`
/// into a pointer-sized field to distinguish it from a real pointer (whose
/// low bits are guaranteed zero by allocator alignment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKey {
    /// Keyed by a real socket's identity.
    Socket(SocketId),
    /// Keyed by a hash of (at minimum) the packet's flow hash, used when no
    /// socket is attached (e.g. forwarded or orphaned traffic).
    Hash(u32),
}

impl FlowKey {
    /// The scalar used to order and bucket this key. Even for real sockets,
    /// odd for hash-synthesized ones, so the two spaces cannot collide.
    pub fn as_u64(self) -> u64 {
        match self {
            FlowKey::Socket(id) => id.0 << 1,
            FlowKey::Hash(h) => (u64::from(h) << 1) | 1,
        }
    }

    /// A bucket-selecting hash over the key itself, standing in for the
    /// source's `hash_ptr(sk, q->fq_trees_log)` -- which hashes the
    /// (real-or-synthesized) pointer value, not the packet's own flow hash.
    pub(crate) fn bucket_hash(self) -> u32 {
        let v = self.as_u64().wrapping_mul(0x9E3779B97F4A7C15);
        ((v >> 32) as u32) ^ (v as u32)
    }
}

impl PartialOrd for FlowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_u64().cmp(&other.as_u64())
    }
}
