use std::cell::OnceCell;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    mapping::{Interpolation, Mapping, sample_positions},
    units::Time,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignalError {
    #[error("Propagation delay was already set to {0}")]
    PropagationDelayAlreadySet(Time),
    #[error("Bitrate was already split into sent and received bitrate")]
    BitrateAlreadySplit,
}

/// One multiplicative contribution to the received power of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attenuation {
    /// Same factor over the whole duration of the signal.
    Uniform(f64),
    /// Factor that varies over time, in absolute (receiver side) time.
    Mapped(Mapping),
}

impl Attenuation {
    pub fn value_at(&self, time: Time) -> f64 {
        match self {
            Attenuation::Uniform(factor) => *factor,
            Attenuation::Mapped(mapping) => mapping.value_at(time),
        }
    }

    fn mapping(&self) -> Option<&Mapping> {
        match self {
            Attenuation::Uniform(_) => None,
            Attenuation::Mapped(mapping) => Some(mapping),
        }
    }
}

/// Physical representation of one transmission as seen by one receiver.
///
/// Created by the sender with transmission power and bitrate, moved to
/// receiver time by [`Signal::set_propagation_delay`] and attenuated by the
/// receiver's analogue models. The received power is computed on demand and
/// cached until the power or the attenuations change.
///
/// Received power outside `[reception_start, reception_end)` is zero.
#[derive(Debug)]
pub struct Signal {
    sending_start: Time,
    duration: Time,
    propagation_delay: Option<Time>,

    transmission_power: Mapping,
    bitrate: Option<Mapping>,
    /// Bitrate in sender time once the propagation delay has been applied.
    tx_bitrate: Option<Mapping>,

    attenuations: Vec<Attenuation>,

    received_power: OnceCell<Mapping>,
}

impl Clone for Signal {
    /// Deep copy of every mapping. The received power cache is rebuilt lazily.
    fn clone(&self) -> Self {
        Self {
            sending_start: self.sending_start,
            duration: self.duration,
            propagation_delay: self.propagation_delay,
            transmission_power: self.transmission_power.clone(),
            bitrate: self.bitrate.clone(),
            tx_bitrate: self.tx_bitrate.clone(),
            attenuations: self.attenuations.clone(),
            received_power: OnceCell::new(),
        }
    }
}

impl Signal {
    pub fn new(sending_start: Time, duration: Time) -> Self {
        Self {
            sending_start,
            duration,
            propagation_delay: None,
            transmission_power: Mapping::default(),
            bitrate: None,
            tx_bitrate: None,
            attenuations: Vec::new(),
            received_power: OnceCell::new(),
        }
    }

    /// Signal with a rectangular transmission power and constant bitrate.
    pub fn rectangular(sending_start: Time, duration: Time, power_mw: f64, bitrate: f64) -> Self {
        let mut signal = Self::new(sending_start, duration);
        signal.set_transmission_power(Mapping::rectangle(
            sending_start,
            sending_start + duration,
            power_mw,
        ));
        signal.bitrate = Some(Mapping::constant(bitrate));
        signal
    }

    pub fn sending_start(&self) -> Time {
        self.sending_start
    }

    pub fn sending_end(&self) -> Time {
        self.sending_start + self.duration
    }

    pub fn reception_start(&self) -> Time {
        self.sending_start + self.propagation_delay()
    }

    pub fn reception_end(&self) -> Time {
        self.reception_start() + self.duration
    }

    pub fn duration(&self) -> Time {
        self.duration
    }

    /// Zero until it has been set.
    pub fn propagation_delay(&self) -> Time {
        self.propagation_delay.unwrap_or(Time::ZERO)
    }

    /// Sets the propagation delay. Can only happen once.
    ///
    /// The bitrate is split: [`Signal::bitrate`] becomes the delayed (receiver
    /// time) bitrate and [`Signal::tx_bitrate`] keeps the original.
    pub fn set_propagation_delay(&mut self, delay: Time) -> Result<(), SignalError> {
        if let Some(existing) = self.propagation_delay {
            return Err(SignalError::PropagationDelayAlreadySet(existing));
        }
        if self.tx_bitrate.is_some() {
            return Err(SignalError::BitrateAlreadySplit);
        }

        self.mark_received_power_outdated();
        self.propagation_delay = Some(delay);

        if let Some(bitrate) = self.bitrate.take() {
            self.bitrate = Some(bitrate.shifted(delay));
            self.tx_bitrate = Some(bitrate);
        }

        Ok(())
    }

    /// Transmission power in sender time (not delayed).
    pub fn transmission_power(&self) -> &Mapping {
        &self.transmission_power
    }

    pub fn set_transmission_power(&mut self, power: Mapping) {
        self.mark_received_power_outdated();
        self.transmission_power = power;
    }

    /// Bitrate in receiver time.
    pub fn bitrate(&self) -> Option<&Mapping> {
        self.bitrate.as_ref()
    }

    /// Bitrate in sender time if the propagation delay split it off.
    pub fn tx_bitrate(&self) -> Option<&Mapping> {
        self.tx_bitrate.as_ref()
    }

    pub fn set_bitrate(&mut self, bitrate: Mapping) -> Result<(), SignalError> {
        if self.tx_bitrate.is_some() {
            return Err(SignalError::BitrateAlreadySplit);
        }
        self.bitrate = Some(bitrate);
        Ok(())
    }

    pub fn attenuations(&self) -> &[Attenuation] {
        &self.attenuations
    }

    pub fn add_attenuation(&mut self, mapping: Mapping) {
        self.mark_received_power_outdated();
        self.attenuations.push(Attenuation::Mapped(mapping));
    }

    pub fn add_uniform_attenuation(&mut self, factor: f64) {
        self.mark_received_power_outdated();
        self.attenuations.push(Attenuation::Uniform(factor));
    }

    /// Received power in mW at `time`.
    ///
    /// Costs one lookup per attenuation and does not touch the cache.
    pub fn received_power_at(&self, time: Time) -> f64 {
        if time < self.reception_start() || time >= self.reception_end() {
            return 0.0;
        }

        let mut sender_time = self.sending_start + (time - self.reception_start());
        if sender_time >= self.sending_end() {
            // rounding of the two window sums can differ in the last bit
            sender_time = just_before(self.sending_end());
        }

        self.attenuations
            .iter()
            .fold(self.transmission_power.value_at(sender_time), |power, att| {
                power * att.value_at(time)
            })
    }

    /// Received power as a step mapping over the reception window.
    ///
    /// It has a key wherever the delayed transmission power or any time
    /// varying attenuation has one, and drops to zero at the reception end.
    /// Linearly interpolated inputs are sampled at their keys.
    pub fn received_power(&self) -> &Mapping {
        self.received_power.get_or_init(|| {
            let start = self.reception_start();
            let end = self.reception_end();

            let delayed_power = self.transmission_power.shifted(self.propagation_delay());
            let mut inputs = vec![&delayed_power];
            inputs.extend(self.attenuations.iter().filter_map(Attenuation::mapping));

            let mut keys: Vec<(Time, f64)> = sample_positions(&inputs, start, end)
                .into_iter()
                .map(|t| (t, self.received_power_at(t)))
                .collect();
            keys.push((end, 0.0));

            Mapping::from_keys(Interpolation::Step, keys)
        })
    }

    fn mark_received_power_outdated(&mut self) {
        self.received_power.take();
    }
}

/// Largest time strictly before `time`.
fn just_before(time: Time) -> Time {
    let seconds = time.seconds();
    if seconds > 0.0 {
        Time::from_seconds(f64::from_bits(seconds.to_bits() - 1))
    } else if seconds == 0.0 {
        Time::from_seconds(-f64::from_bits(1))
    } else {
        Time::from_seconds(f64::from_bits(seconds.to_bits() + 1))
    }
}
