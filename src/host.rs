//! The seam between the scheduler and the host's own I/O and timing.

use crate::units::Nanosecs;

/// Supplies the current time. The scheduler never reads the system clock
/// itself so it can be driven by a simulated or externally-synchronized
/// clock in tests and in hosts that already own a timing source.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Nanosecs;
}

/// Arms the single watchdog timer the scheduler needs for per-flow pacing.
///
/// The scheduler keeps at most one outstanding deadline at a time (the
/// minimum `time_next_packet` across all throttled flows); whenever that
/// minimum changes, `arm` is called with the new deadline. The host is
/// responsible for calling back into the scheduler no earlier than that
/// time (it may legitimately call back later, or call back spuriously --
/// the scheduler simply re-evaluates what is ready).
pub trait Watchdog {
    /// Requests a callback at or after `deadline`. A later call to `arm`
    /// replaces any previously requested deadline.
    fn arm(&mut self, deadline: Nanosecs);

    /// Cancels any previously armed deadline (no throttled flows remain).
    fn disarm(&mut self);
}
