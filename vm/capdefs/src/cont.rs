// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Continuation hooks.
//!
//! The capability layer returns to user mode by tail-calling a
//! continuation stored in the execution context. The core treats the
//! continuation as opaque: it only installs and invokes.

use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

/// The opaque continuation slot of one execution context.
#[derive(Default)]
pub struct Continuation {
    slot: AtomicUsize,
}

impl Continuation {
    pub const fn new() -> Continuation {
        Continuation {
            slot: AtomicUsize::new(0),
        }
    }

    /// Installs the continuation to run on the next return to user
    /// mode.
    pub fn install(&self, f: fn()) {
        self.slot.store(f as usize, Ordering::Release);
    }

    /// Takes and invokes the installed continuation, if any. Returns
    /// whether one ran.
    pub fn invoke(&self) -> bool {
        let raw = self.slot.swap(0, Ordering::AcqRel);
        if raw == 0 {
            return false;
        }
        // The slot only ever holds values stored by `install`.
        let f: fn() = unsafe { core::mem::transmute(raw) };
        f();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::Continuation;
    use core::sync::atomic::AtomicU32;
    use core::sync::atomic::Ordering;

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn bump() {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn install_invoke_once() {
        let c = Continuation::new();
        assert!(!c.invoke());
        c.install(bump);
        assert!(c.invoke());
        // One-shot: consumed by the invoke.
        assert!(!c.invoke());
        assert_eq!(HITS.load(Ordering::Relaxed), 1);
    }
}
