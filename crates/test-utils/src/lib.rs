//! Shared test utilities for the realtime data workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Packet and archive record fixtures
//! - Synthetic loop packet streams
//! - Approximate float assertions
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, assert_approx_eq};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Approximate equality for `Option<f64>` values; `None` only equals `None`.
///
/// ```ignore
/// use test_utils::assert_some_approx_eq;
///
/// assert_some_approx_eq!(Some(2.0001), 2.0, 0.001);
/// ```
#[macro_export]
macro_rules! assert_some_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        match $left {
            Some(value) => $crate::assert_approx_eq!(value, $right, $epsilon),
            None => panic!("assertion failed: expected Some(≈{:?}), got None", $right),
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_some_approx_eq_passes() {
        assert_some_approx_eq!(Some(2.0001_f64), 2.0, 0.001);
    }

    #[test]
    #[should_panic(expected = "got None")]
    fn test_assert_some_approx_eq_none() {
        let value: Option<f64> = None;
        assert_some_approx_eq!(value, 2.0, 0.001);
    }
}
