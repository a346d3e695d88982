//! Time and cancellation seams for the cooperative loop.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// The per-tick yield point.
pub trait Delay {
    /// Suspend for roughly `ms` milliseconds, or yield to the platform.
    fn delay_ms(&mut self, ms: u32);
}

/// A shutdown request, observed only between ticks.
pub trait Shutdown {
    /// Whether the loop should wind down.
    fn is_requested(&self) -> bool;
}

impl Shutdown for AtomicBool {
    fn is_requested(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl Shutdown for Cell<bool> {
    fn is_requested(&self) -> bool {
        self.get()
    }
}

impl<S: Shutdown + ?Sized> Shutdown for &S {
    fn is_requested(&self) -> bool {
        (**self).is_requested()
    }
}
