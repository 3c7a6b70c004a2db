//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// Intern a string slice as an [Id].
pub fn id(s: &str) -> Id {
    Id::from(s.to_owned())
}

/// Target word size in bytes.
pub const WORD: i32 = 4;

/// Declare a `u32` newtype handle addressing an arena.
///
/// A handle is a plain index; the arena owning the entities decides what it
/// means. `Display` renders the handle with a short prefix for dumps.
macro_rules! entity_handle {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

pub(crate) use entity_handle;
