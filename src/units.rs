//! Scalar units: byte counts, nanosecond timestamps/durations, and rates.

macro_rules! unit {
    ($name: ident) => {
        #[allow(missing_docs)]
        #[derive(
            Debug,
            Default,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Add,
            derive_more::Sub,
            derive_more::AddAssign,
            derive_more::SubAssign,
            derive_more::Sum,
            derive_more::Display,
            derive_more::FromStr,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Equivalent to `Self::new(0)`.
            pub const ZERO: $name = Self::new(0);
            /// Equivalent to `Self::new(1)`.
            pub const ONE: $name = Self::new(1);
            /// Equivalent to `Self::new(u64::MAX)`.
            pub const MAX: $name = Self::new(u64::MAX);

            /// Creates a new value.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Converts the value into a `u64`.
            pub const fn into_u64(self) -> u64 {
                self.0
            }

            /// Converts the value into an `f64`.
            pub const fn into_f64(self) -> f64 {
                self.0 as f64
            }

            /// Converts the value into a `usize`.
            pub const fn into_usize(self) -> usize {
                self.0 as usize
            }

            /// Scales the value by `by`.
            pub fn scale_by(self, by: f64) -> Self {
                let inner = self.0 as f64 * by;
                Self(inner.round() as u64)
            }

            /// Divides `self` by `rhs`, returning `None` if `rhs` is zero.
            pub const fn checked_div(self, rhs: u64) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(Self::new(self.0 / rhs))
                }
            }

            /// Adds `rhs` to `self`, saturating at `Self::MAX`.
            pub const fn saturating_add(self, rhs: Self) -> Self {
                Self::new(self.0.saturating_add(rhs.0))
            }

            /// Subtracts `rhs` from `self`, saturating at `Self::ZERO`.
            pub const fn saturating_sub(self, rhs: Self) -> Self {
                Self::new(self.0.saturating_sub(rhs.0))
            }

            /// Returns `a` divided by `b`.
            pub fn frac(a: Self, b: Self) -> f64 {
                a.into_f64() / b.into_f64()
            }
        }
    };
}

unit!(Bytes);

// Nanosecond-resolution scalar. Plays both the instant role (time since an
// arbitrary host-defined epoch, as returned by `Clock::now()`) and the
// duration role, matching the kernel's `ktime_t`-as-scalar convention this
// crate is modeled on. There is exactly one clock domain, so there is no
// separate "delta" type.
unit!(Nanosecs);

// Bytes-per-second scalar, matching `sk_pacing_rate`'s wire units in the
// original source (not bits/s, despite that being the more common
// networking convention) -- `flow_max_rate`, `low_rate_threshold`, and
// `SocketInfo::pacing_rate` are all this unit, and the pacing-delay formula
// in `engine::apply_pacing` depends on that directly.
unit!(BytesPerSec);

impl BytesPerSec {
    /// Returns the amount of time required to transmit `size` at this rate.
    ///
    /// A zero rate has no well-defined transmission time; mirrors
    /// `do_div(len, rate)` being skipped under `likely(rate)` in the
    /// original, which leaves `len` as the un-divided (and therefore huge)
    /// byte count, relying on the caller's one-second clamp. `Nanosecs::MAX`
    /// plays that role here without the caller needing to special-case it.
    pub fn length(&self, size: Bytes) -> Nanosecs {
        if size == Bytes::ZERO {
            return Nanosecs::ZERO;
        }
        if *self == BytesPerSec::ZERO {
            return Nanosecs::MAX;
        }
        let bytes = size.into_f64();
        let bps = self.into_f64();
        let delta = (bytes * 1e9) / bps;
        Nanosecs::new(delta.round() as u64)
    }

    /// Returns the number of bytes that can be transmitted in `delta` time.
    pub fn width(&self, delta: Nanosecs) -> Bytes {
        if delta == Nanosecs::ZERO {
            return Bytes::ZERO;
        }
        let delta = delta.into_f64();
        let bps = self.into_f64();
        let size = (bps * delta) / 1e9;
        Bytes::new(size.round() as u64)
    }
}
