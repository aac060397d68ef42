//! Fair Queue packet scheduler core.
//!
//! A synchronous, single-threaded scheduling core implementing per-flow
//! hash classification, deficit round robin across `new`/`old`/`co`
//! service lists, per-flow EDT pacing, and a co-flow priority-burst
//! override. The host owns the packet representation (via the [`Packet`]
//! trait), the clock (via [`Clock`]), and the watchdog timer (via
//! [`Watchdog`]); this crate owns none of them and does no I/O of its own.
//!
//! Not thread-safe: callers are expected to serialize access to a single
//! [`Scheduler`] the way the kernel relies on the qdisc tree lock.

#[macro_use]
mod ident;

pub mod config;
pub mod error;
pub mod host;
pub mod key;
pub mod packet;
pub mod stats;
pub mod units;

pub(crate) mod engine;
pub(crate) mod flow;
pub(crate) mod queue;
pub(crate) mod table;
pub(crate) mod throttle;

mod scheduler;

pub use config::{CoFlowPorts, Config, ConfigBuilder, ConfigPatch, ConfigPatchBuilder};
pub use error::{ConfigError, Error, ResizeError};
pub use flow::FlowHandle;
pub use host::{Clock, Watchdog};
pub use key::{FlowKey, SocketId, SocketInfo, SocketState};
pub use packet::{Packet, PRIO_CONTROL};
pub use scheduler::{DropReason, EnqueueOutcome, Scheduler};
pub use stats::Stats;
