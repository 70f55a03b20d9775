//! Physical layer reception models for wireless network simulation.
//!
//! A [`signal::Signal`] carries the transmission power of one frame over
//! time. Each receiver filters its own copy through the configured
//! [`analogue_model::AnalogueModel`]s and then lets its [`decider::Decider`]
//! decide, over simulated time, whether the frame was received correctly.
//! The [`radio::Radio`] gates all of this by its half duplex state.
//!
//! The scheduler is not part of this crate. [`phy::PhyLayer`] returns the
//! times at which it wants to be called again, and [`simulation`] provides
//! a small harness that does so for a set of nodes.

pub mod analogue_model;
pub mod config;
pub mod decider;
pub mod geometry;
pub mod mapping;
pub mod obstacle;
pub mod phy;
pub mod radio;
pub mod signal;
pub mod simulation;
pub mod units;
pub mod verification;

use std::fmt::Debug;

/// Checks two values are within 0.001% of each other.
#[allow(unused)]
fn assert_close<T>(a: T, b: T)
where
    T: Into<f64> + Copy + Debug,
{
    let float_a: f64 = a.into();
    let float_b: f64 = b.into();

    if float_a == 0. || float_b == 0. {
        assert!(float_a == float_b, "{a:?} and {b:?} are not close.");
        return;
    }

    let percent_diff = (float_a - float_b).abs() / float_a.abs();

    assert!(percent_diff < 0.00001, "{a:?} and {b:?} are not close.");
}

#[cfg(test)]
mod tests {
    use crate::{assert_close, units::Time};

    #[test]
    fn test_assert_close_pos() {
        assert_close(10.0, 10.0);
        assert_close(Time::from_seconds(200.002), Time::from_seconds(200.001));
    }

    #[test]
    fn test_assert_close_neg() {
        let result = std::panic::catch_unwind(|| assert_close(10.0, 11.0));
        assert!(result.is_err());
        let result = std::panic::catch_unwind(|| assert_close(0.0, 1e-12));
        assert!(result.is_err());
    }
}
