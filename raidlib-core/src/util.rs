// vim: tw=80
//! Common utility functions used throughout the RAID library

use atomic_enum::atomic_enum;
use cfg_if::cfg_if;
use std::{
    ops::{Add, Div, Mul, Rem, Sub},
    sync::atomic::Ordering
};

/// Divide two unsigned numbers (usually integers), rounding up.
pub fn div_roundup<T>(dividend: T, divisor: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + From<u8> + Sub<Output=T>
{
    (dividend + divisor - T::from(1u8)) / divisor
}

/// Round `x` down to a multiple of `m`
pub fn round_down<T>(x: T, m: T) -> T
    where T: Copy + Rem<Output=T> + Sub<Output=T>
{
    x - x % m
}

/// Round `x` up to a multiple of `m`
pub fn round_up<T>(x: T, m: T) -> T
    where T: Add<Output=T> + Copy + Div<Output=T> + From<u8> +
             Mul<Output=T> + Sub<Output=T>
{
    div_roundup(x, m) * m
}

/// Check an internal-consistency condition.
///
/// On failure, log the condition along with the supplied context and return
/// `Err(Error::Invariant)` from the enclosing function.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            ::tracing::error!(condition = stringify!($cond), $($arg)+);
            return Err($crate::types::Error::Invariant);
        }
    };
    ($cond:expr) => {
        if !($cond) {
            ::tracing::error!(condition = stringify!($cond),
                "invariant violated");
            return Err($crate::types::Error::Invariant);
        }
    };
}

/// What to do when a request hits an unexpected error.
#[atomic_enum]
enum UnexpectedErrorPolicy {
    /// Fail only the affected request
    Recover,
    /// Treat the error as a fatal logic error
    Panic
}

cfg_if! {
    if #[cfg(feature = "panic-on-unexpected")] {
        static POLICY: AtomicUnexpectedErrorPolicy =
            AtomicUnexpectedErrorPolicy::new(UnexpectedErrorPolicy::Panic);
    } else {
        static POLICY: AtomicUnexpectedErrorPolicy =
            AtomicUnexpectedErrorPolicy::new(UnexpectedErrorPolicy::Recover);
    }
}

/// Should unexpected per-request errors panic?
pub fn panic_on_unexpected_error() -> bool {
    matches!(POLICY.load(Ordering::Relaxed), UnexpectedErrorPolicy::Panic)
}

/// Change the process-wide unexpected error policy.
pub fn set_panic_on_unexpected_error(panic: bool) {
    let policy = if panic {
        UnexpectedErrorPolicy::Panic
    } else {
        UnexpectedErrorPolicy::Recover
    };
    POLICY.store(policy, Ordering::Relaxed);
}

// LCOV_EXCL_STOP
