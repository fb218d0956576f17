#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod identity_key;
pub use identity_key::IdentityKey;

pub mod identity_map;
pub use identity_map::IdentityMap;

mod resize_policy;
pub use resize_policy::{
    GrowthPolicy, ProportionalPolicy, ResizeContext, ResizePolicy, DEFAULT_GROWTH_FACTOR,
    DEFAULT_INITIAL_CAPACITY,
};

mod table;

#[cfg(feature = "serde")]
mod serde;

pub use sdd::{self, Guard};
