macro_rules! handle {
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
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// The always-admitted internal flow. Never allocated from the
            /// arena's free list, never garbage-collected.
            pub const INTERNAL: $name = Self::new(u32::MAX);

            pub(crate) const fn new(value: u32) -> Self {
                Self(value)
            }

            pub(crate) fn into_usize(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_usize(val: usize) -> Self {
                Self(val as u32)
            }
        }
    };
}
