use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::{DeciderResult, SenseMode};
use crate::{
    mapping::{Mapping, sample_positions},
    phy::AirFrame,
    units::Time,
};

/// How a finished reception is judged and how the channel is sensed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub enum AcceptancePolicy {
    /// Every reception that clears the sensitivity is correct. The channel
    /// is busy exactly while a frame is being received.
    #[default]
    AcceptAll,
    /// A reception is correct if its SNR never drops below `snr_threshold`
    /// (linear). The channel is idle while the RSSI is at most
    /// `busy_threshold` (mW).
    SnrThreshold {
        snr_threshold: f64,
        busy_threshold: f64,
    },
}

impl AcceptancePolicy {
    pub fn evaluate(
        &self,
        frame: &AirFrame,
        interferers: &[Rc<AirFrame>],
        noise: f64,
        start: Time,
        end: Time,
    ) -> DeciderResult {
        let min_snr = min_snr(frame, interferers, noise, start, end);

        let correct = match self {
            AcceptancePolicy::AcceptAll => true,
            AcceptancePolicy::SnrThreshold { snr_threshold, .. } => min_snr >= *snr_threshold,
        };

        DeciderResult {
            correct,
            min_snr,
            bitrate: frame
                .signal
                .bitrate()
                .map_or(0.0, |bitrate| bitrate.value_at(start)),
        }
    }

    pub fn is_idle(&self, receiving: bool, rssi: f64) -> bool {
        match self {
            AcceptancePolicy::AcceptAll => !receiving,
            AcceptancePolicy::SnrThreshold { busy_threshold, .. } => rssi <= *busy_threshold,
        }
    }

    pub fn supports(&self, mode: SenseMode) -> bool {
        !matches!(
            (self, mode),
            (AcceptancePolicy::SnrThreshold { .. }, SenseMode::UntilTimeout)
        )
    }
}

/// Header check done before committing to a full reception.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeaderCheck {
    pub header_duration: Time,
    /// Linear SNR the header has to reach at every sample.
    pub snr_threshold: f64,
}

fn snr(signal: f64, noise: f64) -> f64 {
    if noise == 0.0 {
        if signal > 0.0 { f64::INFINITY } else { 0.0 }
    } else {
        signal / noise
    }
}

/// Lowest SNR of `frame` over `[start, end)`, sampled at every point any
/// of the involved received powers changes.
pub fn min_snr(
    frame: &AirFrame,
    interferers: &[Rc<AirFrame>],
    noise: f64,
    start: Time,
    end: Time,
) -> f64 {
    let others: Vec<&AirFrame> = interferers
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| f.id != frame.id)
        .collect();

    let mappings: Vec<&Mapping> = std::iter::once(frame)
        .chain(others.iter().copied())
        .map(|f| f.signal.received_power())
        .collect();

    sample_positions(&mappings, start, end)
        .into_iter()
        .map(|t| {
            let interference: f64 = others.iter().map(|f| f.signal.received_power_at(t)).sum();
            snr(frame.signal.received_power_at(t), noise + interference)
        })
        .fold(f64::INFINITY, f64::min)
}

/// Highest total power on the channel over the closed interval
/// `[start, end]`, noise included.
pub fn channel_sense_rssi(frames: &[Rc<AirFrame>], noise: f64, start: Time, end: Time) -> f64 {
    let mappings: Vec<&Mapping> = frames.iter().map(|f| f.signal.received_power()).collect();

    let mut positions = sample_positions(&mappings, start, end);
    if end > start {
        positions.push(end);
    }

    positions
        .into_iter()
        .map(|t| noise + frames.iter().map(|f| f.signal.received_power_at(t)).sum::<f64>())
        .fold(noise, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assert_close,
        signal::Signal,
        units::{MILLIS, SECONDS},
    };

    fn frame(id: u32, start: Time, duration: Time, power: f64) -> Rc<AirFrame> {
        Rc::new(AirFrame {
            id,
            sender: 0,
            channel: 0,
            signal: Signal::rectangular(start, duration, power, 6e6),
        })
    }

    #[test]
    fn snr_takes_the_worst_sample() {
        let target = frame(1, Time::ZERO, 10.0 * MILLIS, 10.0);
        let late = frame(2, 5.0 * MILLIS, 10.0 * MILLIS, 1.0);

        let snr = min_snr(&target, &[target.clone(), late], 0.1, Time::ZERO, 10.0 * MILLIS);
        assert_close(snr, 10.0 / 1.1);
    }

    #[test]
    fn interference_after_the_window_is_ignored() {
        let target = frame(1, Time::ZERO, 10.0 * MILLIS, 10.0);
        let after = frame(2, 10.0 * MILLIS, 10.0 * MILLIS, 100.0);

        let snr = min_snr(&target, &[after], 0.1, Time::ZERO, 10.0 * MILLIS);
        assert_close(snr, 100.0);
    }

    #[test]
    fn silent_channel_has_infinite_snr() {
        let target = frame(1, Time::ZERO, 1.0 * SECONDS, 1.0);
        assert_eq!(min_snr(&target, &[], 0.0, Time::ZERO, 1.0 * SECONDS), f64::INFINITY);
    }

    #[test]
    fn threshold_is_inclusive() {
        let target = frame(1, Time::ZERO, 1.0 * SECONDS, 4.0);
        let policy = AcceptancePolicy::SnrThreshold {
            snr_threshold: 2.0,
            busy_threshold: 1.0,
        };

        let at = policy.evaluate(&target, &[], 2.0, Time::ZERO, 1.0 * SECONDS);
        assert!(at.is_signal_correct());
        assert_eq!(at.min_snr, 2.0);
        assert_eq!(at.bitrate, 6e6);

        let below = policy.evaluate(&target, &[], 2.0000001, Time::ZERO, 1.0 * SECONDS);
        assert!(!below.is_signal_correct());
    }

    #[test]
    fn rssi_is_the_peak_over_the_interval() {
        let a = frame(1, Time::ZERO, 10.0 * MILLIS, 2.0);
        let b = frame(2, 5.0 * MILLIS, 10.0 * MILLIS, 3.0);
        let frames = [a, b];

        assert_close(channel_sense_rssi(&frames, 0.5, Time::ZERO, 20.0 * MILLIS), 5.5);
        assert_close(channel_sense_rssi(&frames, 0.5, 12.0 * MILLIS, 12.0 * MILLIS), 3.5);
        assert_close(channel_sense_rssi(&frames, 0.5, 15.0 * MILLIS, 15.0 * MILLIS), 0.5);
    }

    #[test]
    fn idleness() {
        assert!(AcceptancePolicy::AcceptAll.is_idle(false, 100.0));
        assert!(!AcceptancePolicy::AcceptAll.is_idle(true, 0.0));

        let snr = AcceptancePolicy::SnrThreshold {
            snr_threshold: 1.0,
            busy_threshold: 0.5,
        };
        assert!(snr.is_idle(true, 0.5));
        assert!(!snr.is_idle(false, 0.51));
        assert!(!snr.supports(SenseMode::UntilTimeout));
        assert!(AcceptancePolicy::AcceptAll.supports(SenseMode::UntilTimeout));
    }
}
