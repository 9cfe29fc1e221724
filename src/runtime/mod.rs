//! Runtime environment for quicken
//!
//! This module provides the object model the adaptive core guards on
//! (versioned namespaces, shaped instances, versioned functions), the
//! generic semantics of every instruction, and the interpreter.

pub mod builtins;
mod namespace;
mod object;
pub mod ops;
mod value;
mod vm;

pub use namespace::Namespace;
pub use object::{Class, Instance, Module, Shape};
pub use value::{Builtin, Function, NativeFn, Value};
pub use vm::{TraceEvent, Vm};

use std::sync::atomic::{AtomicU32, Ordering};

/// Source of guard tokens
///
/// Hands out increasing non-zero values. Once exhausted it only returns 0,
/// which every specializer treats as "unversioned" and refuses.
pub(crate) struct VersionCounter(AtomicU32);

impl VersionCounter {
    pub(crate) const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub(crate) fn next(&self) -> u32 {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current == u32::MAX {
                    None
                } else {
                    Some(current + 1)
                }
            })
            .unwrap_or(0)
    }
}

/// Namespace key-set versions
pub(crate) static KEYS_VERSIONS: VersionCounter = VersionCounter::new();
/// Function versions
pub(crate) static FUNCTION_VERSIONS: VersionCounter = VersionCounter::new();
/// Builtin identities
pub(crate) static BUILTIN_IDS: VersionCounter = VersionCounter::new();
/// Instance shape identities
pub(crate) static SHAPE_IDS: VersionCounter = VersionCounter::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_counter_is_nonzero_and_increasing() {
        let counter = VersionCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[test]
    fn test_exhausted_counter_yields_unversioned() {
        let counter = VersionCounter(AtomicU32::new(u32::MAX - 1));
        assert_eq!(counter.next(), u32::MAX - 1);
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 0);
    }
}
