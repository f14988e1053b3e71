//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! On-disk headers (map headers, chain nodes, journal entries) store their
//! integers as zerocopy little-endian wrappers so they can be read from
//! unaligned bytes. This macro generates plain getters and `set_` setters for
//! those fields.
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct NodeHeader {
//!     next: U64,
//!     key_len: U32,
//! }
//!
//! impl NodeHeader {
//!     zerocopy_accessors! {
//!         next: u64,
//!         key_len: u32,
//!     }
//! }
//!
//! // node.next() -> u64, node.set_next(7), node.key_len() -> u32, ...
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
