//! Hash-bucketed flow table: classification, lazy garbage collection, and
//! bucket-count resizing (§4.1).

use std::collections::BTreeMap;

use crate::{
    error::ResizeError,
    flow::{FlowRecord, Membership},
    key::FlowKey,
    units::{Bytes, Nanosecs},
};

pub(crate) use crate::flow::FlowHandle;

/// Cap on detached flows reclaimed in a single `gc_bucket` call.
const GC_MAX: usize = 8;
/// Minimum age (time since detach) before a flow is GC-eligible.
const GC_AGE: Nanosecs = Nanosecs::new(3_000_000_000);

/// Outcome of `FlowTable::classify`.
pub(crate) struct Classified {
    pub(crate) handle: FlowHandle,
    pub(crate) created: bool,
    /// Set when an existing socket-keyed flow's `socket_hash` no longer
    /// matches the socket's current identity hash (§4.1 socket-reuse
    /// refresh): `credit` has already been reset to `initial_quantum` and
    /// `time_next_packet` zeroed by the time this is returned.
    pub(crate) refreshed: bool,
    /// Set (to the deadline it was throttled under) when the flow being
    /// refreshed was throttled at the moment of refresh -- the caller must
    /// pull it out of the throttle set and back onto `old_list`, matching
    /// `fq_flow_unset_throttled`.
    pub(crate) was_throttled: Option<Nanosecs>,
    /// Flows reclaimed by the gc pass run against this classification's
    /// bucket, if the table was under pressure.
    pub(crate) gc_reclaimed: usize,
    /// Set when a brand-new flow was needed but the arena could not grow to
    /// hold it (§4.1 Failure). `handle` is meaningless when this is set; the
    /// caller is expected to fall back to the internal flow instead of using
    /// it, matching the source's best-effort degraded admission.
    pub(crate) allocation_failed: bool,
}

/// Hash-bucketed, ordered-tree flow table with an arena of flow records and
/// a free list for reuse after garbage collection.
///
/// Each bucket is a `BTreeMap<u64, FlowHandle>` ordered by `FlowKey::as_u64`,
/// standing in for the source's per-bucket rbtree (§9 sanctioned
/// substitute).
#[derive(Debug)]
pub(crate) struct FlowTable<P> {
    buckets: Vec<BTreeMap<u64, FlowHandle>>,
    buckets_log: u8,
    arena: Vec<Option<FlowRecord<P>>>,
    free: Vec<FlowHandle>,
    total_flows: usize,
    inactive_flows: usize,
}

impl<P> FlowTable<P> {
    pub(crate) fn new(buckets_log: u8) -> Self {
        Self {
            buckets: (0..(1usize << buckets_log)).map(|_| BTreeMap::new()).collect(),
            buckets_log,
            arena: Vec::new(),
            free: Vec::new(),
            total_flows: 0,
            inactive_flows: 0,
        }
    }

    fn bucket_index_for(hash: u32, buckets_log: u8) -> usize {
        (hash as usize) & ((1usize << buckets_log) - 1)
    }

    fn bucket_index(&self, hash: u32) -> usize {
        Self::bucket_index_for(hash, self.buckets_log)
    }

    pub(crate) fn get(&self, handle: FlowHandle) -> Option<&FlowRecord<P>> {
        self.arena.get(handle.into_usize()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, handle: FlowHandle) -> Option<&mut FlowRecord<P>> {
        self.arena
            .get_mut(handle.into_usize())
            .and_then(Option::as_mut)
    }

    /// Finds the existing flow for `key`/`hash`, or allocates a new one.
    ///
    /// `socket_identity_hash` is `Some(sk_hash)` only when `key` is a real
    /// socket key (never for hash-synthesized orphan keys); when present
    /// against an existing match, a mismatch against the flow's stored
    /// `socket_hash` triggers the reuse refresh (§4.1). Runs bucket-scoped
    /// GC first if the table is under pressure.
    pub(crate) fn classify(
        &mut self,
        key: FlowKey,
        hash: u32,
        socket_identity_hash: Option<u32>,
        initial_quantum: Bytes,
        now: Nanosecs,
    ) -> Classified {
        let bucket = self.bucket_index(hash);

        let gc_reclaimed = if self.under_gc_pressure() {
            self.gc_bucket(bucket, now)
        } else {
            0
        };

        if let Some(&handle) = self.buckets[bucket].get(&key.as_u64()) {
            let mut refreshed = false;
            let mut was_throttled = None;
            if let Some(sk_hash) = socket_identity_hash {
                if let Some(flow) = self.get_mut(handle) {
                    if flow.socket_hash != sk_hash {
                        flow.credit = initial_quantum.into_u64() as i64;
                        flow.socket_hash = sk_hash;
                        if flow.is_throttled() {
                            was_throttled = Some(flow.time_next_packet);
                        }
                        flow.time_next_packet = Nanosecs::ZERO;
                        refreshed = true;
                        tracing::debug!(?handle, "flow refreshed: socket identity reused");
                    }
                }
            }
            return Classified {
                handle,
                created: false,
                refreshed,
                was_throttled,
                gc_reclaimed,
                allocation_failed: false,
            };
        }

        let handle = if let Some(handle) = self.free.pop() {
            self.arena[handle.into_usize()] = Some(FlowRecord::new(handle, key));
            handle
        } else {
            if self.arena.try_reserve(1).is_err() {
                tracing::warn!(?key, "flow allocation failed, degrading to internal flow");
                return Classified {
                    handle: FlowHandle::INTERNAL,
                    created: false,
                    refreshed: false,
                    was_throttled: None,
                    gc_reclaimed,
                    allocation_failed: true,
                };
            }
            let handle = FlowHandle::from_usize(self.arena.len());
            self.arena.push(Some(FlowRecord::new(handle, key)));
            handle
        };
        if let Some(flow) = self.get_mut(handle) {
            flow.credit = initial_quantum.into_u64() as i64;
            if let Some(sk_hash) = socket_identity_hash {
                flow.socket_hash = sk_hash;
            }
        }

        self.buckets[bucket].insert(key.as_u64(), handle);
        self.total_flows += 1;
        self.inactive_flows += 1; // a freshly-created flow starts detached
        tracing::debug!(?key, hash, total = self.total_flows, "flow created");

        Classified {
            handle,
            created: true,
            refreshed: false,
            was_throttled: None,
            gc_reclaimed,
            allocation_failed: false,
        }
    }

    pub(crate) fn mark_active(&mut self, handle: FlowHandle, was_detached: bool) {
        if was_detached {
            self.inactive_flows = self.inactive_flows.saturating_sub(1);
            tracing::debug!(?handle, "flow refreshed from detached");
        }
    }

    pub(crate) fn mark_detached(&mut self, handle: FlowHandle, now: Nanosecs) {
        if let Some(flow) = self.get_mut(handle) {
            if !flow.is_detached() {
                flow.membership = Membership::Detached { since: now };
                self.inactive_flows += 1;
            }
        }
    }

    /// Pressure gate from §4.1: GC only runs once the table has grown to at
    /// least twice its bucket count and more than half its flows are idle.
    pub(crate) fn under_gc_pressure(&self) -> bool {
        self.total_flows >= 2 * self.buckets.len() && self.inactive_flows > self.total_flows / 2
    }

    fn is_gc_candidate(flow: &FlowRecord<P>, now: Nanosecs) -> bool {
        flow.is_detached()
            && flow.is_empty()
            && flow
                .detached_since()
                .map(|since| now.saturating_sub(since) >= GC_AGE)
                .unwrap_or(false)
    }

    /// Reclaims up to `GC_MAX` detached flows older than `GC_AGE` from a
    /// single bucket. The source walks the bucket's rbtree toward the key
    /// being classified, stopping at the first `GC_MAX` candidates or the
    /// match; with an ordered `BTreeMap` in hand, scanning the bucket in
    /// key order is the same bound with a simpler walk.
    fn gc_bucket(&mut self, bucket: usize, now: Nanosecs) -> usize {
        let arena = &mut self.arena;
        let mut freed = Vec::with_capacity(GC_MAX);
        self.buckets[bucket].retain(|_, &mut handle| {
            if freed.len() >= GC_MAX {
                return true;
            }
            let idx = handle.into_usize();
            let reclaim = arena[idx]
                .as_ref()
                .map(|f| Self::is_gc_candidate(f, now))
                .unwrap_or(false);
            if reclaim {
                arena[idx] = None;
                freed.push(handle);
                false
            } else {
                true
            }
        });
        let collected = freed.len();
        self.total_flows -= collected;
        self.inactive_flows -= collected;
        self.free.extend(freed);
        if collected > 0 {
            tracing::debug!(collected, bucket, total = self.total_flows, "flow table gc");
        }
        collected
    }

    /// Age-gated full-table sweep, with no per-bucket `GC_MAX` cap. An
    /// ambient maintenance pass run from `Scheduler::change()`, since a
    /// config change is a natural point to reclaim stale flows that no
    /// `classify()` call happens to visit.
    pub(crate) fn gc_sweep_all(&mut self, now: Nanosecs) -> usize {
        if !self.under_gc_pressure() {
            return 0;
        }
        let arena = &mut self.arena;
        let mut freed = Vec::new();
        for bucket in &mut self.buckets {
            bucket.retain(|_, &mut handle| {
                let idx = handle.into_usize();
                let reclaim = arena[idx]
                    .as_ref()
                    .map(|f| Self::is_gc_candidate(f, now))
                    .unwrap_or(false);
                if reclaim {
                    arena[idx] = None;
                    freed.push(handle);
                    false
                } else {
                    true
                }
            });
        }
        let collected = freed.len();
        self.total_flows -= collected;
        self.inactive_flows -= collected;
        self.free.extend(freed);
        if collected > 0 {
            tracing::debug!(collected, total = self.total_flows, "flow table gc sweep");
        }
        collected
    }

    /// Rehashes every live flow into a table with `2^new_log` buckets,
    /// dropping age-gated GC candidates in the process (§4.1 `resize`).
    ///
    /// Allocating the new bucket array is attempted up front, before any
    /// existing state is touched, so a failure (§5: "allocation failure is
    /// reported, no blocking") leaves the table exactly as it was.
    pub(crate) fn resize(&mut self, new_log: u8, now: Nanosecs) -> Result<(), ResizeError> {
        let bucket_count = 1usize << new_log;
        let mut new_buckets: Vec<BTreeMap<u64, FlowHandle>> = Vec::new();
        new_buckets
            .try_reserve_exact(bucket_count)
            .map_err(|_| ResizeError { requested: bucket_count })?;
        new_buckets.extend((0..bucket_count).map(|_| BTreeMap::new()));
        let mut freed = Vec::new();
        for bucket in &self.buckets {
            for (&key_u64, &handle) in bucket {
                let Some(flow) = self.arena[handle.into_usize()].as_ref() else {
                    continue;
                };
                if Self::is_gc_candidate(flow, now) {
                    freed.push(handle);
                    continue;
                }
                let idx = Self::bucket_index_for(flow.key.bucket_hash(), new_log);
                new_buckets[idx].insert(key_u64, handle);
            }
        }
        for handle in &freed {
            self.arena[handle.into_usize()] = None;
        }
        let collected = freed.len();
        self.total_flows -= collected;
        self.inactive_flows -= collected;
        self.free.extend(freed);

        self.buckets = new_buckets;
        self.buckets_log = new_log;
        tracing::debug!(new_log, collected, "flow table resized");
        Ok(())
    }

    pub(crate) fn total_flows(&self) -> usize {
        self.total_flows
    }

    pub(crate) fn inactive_flows(&self) -> usize {
        self.inactive_flows
    }
}
