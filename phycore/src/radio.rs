//! Half duplex radio hardware: its state, switching latencies, channel and
//! the attenuation timeline the state implies for incoming signals.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::ConfigError,
    mapping::{Interpolation, Mapping},
    units::Time,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioState {
    Rx,
    Tx,
    Sleep,
    Switching,
}

pub const NUM_RADIO_STATES: usize = 4;

impl RadioState {
    pub const ALL: [RadioState; NUM_RADIO_STATES] = [
        RadioState::Rx,
        RadioState::Tx,
        RadioState::Sleep,
        RadioState::Switching,
    ];

    pub fn index(self) -> usize {
        match self {
            RadioState::Rx => 0,
            RadioState::Tx => 1,
            RadioState::Sleep => 2,
            RadioState::Switching => 3,
        }
    }
}

impl Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RadioState::Rx => "RX",
            RadioState::Tx => "TX",
            RadioState::Sleep => "SLEEP",
            RadioState::Switching => "SWITCHING",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    #[error("radio is already switching")]
    AlreadySwitching,
    #[error("radio is not switching")]
    NotSwitching,
    #[error("{0} is not a valid target state")]
    InvalidState(RadioState),
    #[error("switch times must not be negative")]
    NegativeSwitchTime,
    #[error("channel {channel} is outside 0..{nb_channels}")]
    InvalidChannel { channel: usize, nb_channels: usize },
}

/// Switch latencies as configured. Missing entries fall back to the
/// entry for the same target state from the other source state, then
/// to zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SwitchTimes {
    pub rx_to_tx: Option<Time>,
    pub rx_to_sleep: Option<Time>,
    pub tx_to_rx: Option<Time>,
    pub tx_to_sleep: Option<Time>,
    pub sleep_to_rx: Option<Time>,
    pub sleep_to_tx: Option<Time>,
}

impl SwitchTimes {
    fn resolve(a: Option<Time>, b: Option<Time>) -> Time {
        a.or(b).unwrap_or(Time::ZERO)
    }

    pub fn rx_to_tx(&self) -> Time {
        Self::resolve(self.rx_to_tx, self.sleep_to_tx)
    }

    pub fn sleep_to_tx(&self) -> Time {
        Self::resolve(self.sleep_to_tx, self.rx_to_tx)
    }

    pub fn tx_to_rx(&self) -> Time {
        Self::resolve(self.tx_to_rx, self.sleep_to_rx)
    }

    pub fn sleep_to_rx(&self) -> Time {
        Self::resolve(self.sleep_to_rx, self.tx_to_rx)
    }

    pub fn tx_to_sleep(&self) -> Time {
        Self::resolve(self.tx_to_sleep, self.rx_to_sleep)
    }

    pub fn rx_to_sleep(&self) -> Time {
        Self::resolve(self.rx_to_sleep, self.tx_to_sleep)
    }

    fn configured(&self) -> impl Iterator<Item = Time> {
        [
            self.rx_to_tx,
            self.rx_to_sleep,
            self.tx_to_rx,
            self.tx_to_sleep,
            self.sleep_to_rx,
            self.sleep_to_tx,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadioConfig {
    pub initial_state: RadioState,
    pub switch_times: SwitchTimes,
    pub nb_channels: usize,
    pub initial_channel: usize,
    /// Attenuation of incoming signals while receiving.
    pub min_att: f64,
    /// Attenuation of incoming signals in every other state.
    pub max_att: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            initial_state: RadioState::Rx,
            switch_times: SwitchTimes::default(),
            nb_channels: 1,
            initial_channel: 0,
            min_att: 1.0,
            max_att: 0.0,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_state == RadioState::Switching {
            return Err(ConfigError::InvalidInitialRadioState);
        }
        if let Some(time) = self.switch_times.configured().find(|t| !(t.is_finite() && *t >= Time::ZERO)) {
            return Err(ConfigError::NegativeSwitchTime(time));
        }
        if self.nb_channels == 0 || self.initial_channel >= self.nb_channels {
            return Err(ConfigError::InvalidChannel {
                channel: self.initial_channel,
                nb_channels: self.nb_channels,
            });
        }
        for (name, value) in [("min_att", self.min_att), ("max_att", self.max_att)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidParameter {
                    model: "Radio",
                    parameter: name,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Timeline of the attenuation the radio state puts on incoming signals.
///
/// While tracking, history is kept so signals still on the air can be
/// evaluated against it. Otherwise only the current entry is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioStateAnalogueModel {
    timeline: Vec<(Time, f64)>,
    tracking: bool,
}

impl RadioStateAnalogueModel {
    pub fn new(initial: f64) -> Self {
        RadioStateAnalogueModel {
            timeline: vec![(Time::ZERO, initial)],
            tracking: false,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    /// Entries from `time` on are replaced by `value`.
    pub fn write_recv_entry(&mut self, time: Time, value: f64) {
        self.write_future_entry(time, value);

        if !self.tracking {
            self.clean_up_until(time);
        }
    }

    /// Like [`Self::write_recv_entry`] but keeps the history before `time`
    /// even when not tracking.
    pub fn write_future_entry(&mut self, time: Time, value: f64) {
        self.timeline.retain(|(t, _)| *t < time);
        self.timeline.push((time, value));
    }

    /// Drops history before `time`, keeping the entry in force at `time`.
    pub fn clean_up_until(&mut self, time: Time) {
        let in_force = self.timeline.iter().rposition(|(t, _)| *t <= time);
        if let Some(n) = in_force {
            self.timeline.drain(..n);
            self.timeline[0].0 = time;
        }
    }

    pub fn value_at(&self, time: Time) -> f64 {
        self.timeline
            .iter()
            .rev()
            .find(|(t, _)| *t <= time)
            .or(self.timeline.first())
            .map_or(1.0, |(_, v)| *v)
    }

    /// Step mapping of the timeline over `[start, end)`.
    pub fn attenuation(&self, start: Time, end: Time) -> Mapping {
        let keys = std::iter::once((start, self.value_at(start))).chain(
            self.timeline
                .iter()
                .filter(|(t, _)| *t > start && *t < end)
                .copied(),
        );
        Mapping::from_keys(Interpolation::Step, keys)
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Radio {
    state: RadioState,
    next_state: RadioState,
    sw_times: [[Time; NUM_RADIO_STATES]; NUM_RADIO_STATES],
    min_att: f64,
    max_att: f64,
    rsam: RadioStateAnalogueModel,
    current_channel: usize,
    nb_channels: usize,
}

impl Radio {
    pub fn new(config: &RadioConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut radio = Radio {
            state: config.initial_state,
            next_state: config.initial_state,
            sw_times: [[Time::ZERO; NUM_RADIO_STATES]; NUM_RADIO_STATES],
            min_att: config.min_att,
            max_att: config.max_att,
            rsam: RadioStateAnalogueModel::new(Self::att_for(
                config.initial_state,
                config.min_att,
                config.max_att,
            )),
            current_channel: config.initial_channel,
            nb_channels: config.nb_channels,
        };

        use RadioState::*;
        let times = &config.switch_times;
        radio.sw_times[Rx.index()][Tx.index()] = times.rx_to_tx();
        radio.sw_times[Rx.index()][Sleep.index()] = times.rx_to_sleep();
        radio.sw_times[Tx.index()][Rx.index()] = times.tx_to_rx();
        radio.sw_times[Tx.index()][Sleep.index()] = times.tx_to_sleep();
        radio.sw_times[Sleep.index()][Rx.index()] = times.sleep_to_rx();
        radio.sw_times[Sleep.index()][Tx.index()] = times.sleep_to_tx();

        Ok(radio)
    }

    fn att_for(state: RadioState, min_att: f64, max_att: f64) -> f64 {
        if state == RadioState::Rx { min_att } else { max_att }
    }

    fn attenuation_for(&self, state: RadioState) -> f64 {
        Self::att_for(state, self.min_att, self.max_att)
    }

    pub fn current_state(&self) -> RadioState {
        self.state
    }

    pub fn next_state(&self) -> RadioState {
        self.next_state
    }

    pub fn switch_time(&self, from: RadioState, to: RadioState) -> Time {
        self.sw_times[from.index()][to.index()]
    }

    /// Starts a switch to `new_state` and returns how long it takes.
    ///
    /// The caller has to call [`Radio::end_switch`] once that time has
    /// passed, immediately for a zero length switch.
    pub fn switch_to(&mut self, new_state: RadioState, now: Time) -> Result<Time, RadioError> {
        if new_state == RadioState::Switching {
            return Err(RadioError::InvalidState(new_state));
        }
        if self.state == RadioState::Switching {
            return Err(RadioError::AlreadySwitching);
        }

        let duration = self.switch_time(self.state, new_state);
        log::trace!("radio switching {} -> {new_state} in {duration}s", self.state);

        self.next_state = new_state;
        self.state = RadioState::Switching;

        self.rsam.write_recv_entry(now, self.attenuation_for(RadioState::Switching));
        // the expected end so signals arriving now see the coming state
        self.rsam
            .write_future_entry(now + duration, self.attenuation_for(new_state));

        Ok(duration)
    }

    pub fn end_switch(&mut self, now: Time) -> Result<(), RadioError> {
        if self.state != RadioState::Switching {
            return Err(RadioError::NotSwitching);
        }

        self.state = self.next_state;
        self.rsam.write_recv_entry(now, self.attenuation_for(self.state));
        Ok(())
    }

    pub fn set_switch_time(&mut self, from: RadioState, to: RadioState, time: Time) -> Result<(), RadioError> {
        if from == RadioState::Switching {
            return Err(RadioError::InvalidState(from));
        }
        if to == RadioState::Switching {
            return Err(RadioError::InvalidState(to));
        }
        if !(time.is_finite() && time >= Time::ZERO) {
            return Err(RadioError::NegativeSwitchTime);
        }

        self.sw_times[from.index()][to.index()] = time;
        Ok(())
    }

    pub fn current_channel(&self) -> usize {
        self.current_channel
    }

    pub fn nb_channels(&self) -> usize {
        self.nb_channels
    }

    pub fn set_current_channel(&mut self, channel: usize) -> Result<(), RadioError> {
        if channel >= self.nb_channels {
            return Err(RadioError::InvalidChannel {
                channel,
                nb_channels: self.nb_channels,
            });
        }
        self.current_channel = channel;
        Ok(())
    }

    pub fn rsam(&self) -> &RadioStateAnalogueModel {
        &self.rsam
    }

    pub fn rsam_mut(&mut self) -> &mut RadioStateAnalogueModel {
        &mut self.rsam
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{MICROS, MILLIS};

    fn radio() -> Radio {
        let config = RadioConfig {
            switch_times: SwitchTimes {
                rx_to_tx: Some(3.0 * MICROS),
                tx_to_rx: Some(2.0 * MICROS),
                rx_to_sleep: Some(1.0 * MICROS),
                sleep_to_rx: Some(4.0 * MICROS),
                ..Default::default()
            },
            nb_channels: 3,
            ..Default::default()
        };
        Radio::new(&config).unwrap()
    }

    #[test]
    fn switching_matrix() {
        let mut radio = radio();
        let mut now = Time::ZERO;

        for (to, expected) in [
            (RadioState::Tx, 3.0 * MICROS),
            (RadioState::Rx, 2.0 * MICROS),
            (RadioState::Sleep, 1.0 * MICROS),
            (RadioState::Rx, 4.0 * MICROS),
            (RadioState::Rx, Time::ZERO),
        ] {
            let duration = radio.switch_to(to, now).unwrap();
            assert_eq!(duration, expected, "switch to {to}");
            assert_eq!(radio.current_state(), RadioState::Switching);
            assert_eq!(radio.next_state(), to);

            now = now + duration;
            radio.end_switch(now).unwrap();
            assert_eq!(radio.current_state(), to);
        }
    }

    #[test]
    fn fallback_pairs() {
        let radio = radio();
        // unset sleep -> tx and tx -> sleep use their partners
        assert_eq!(radio.switch_time(RadioState::Sleep, RadioState::Tx), 3.0 * MICROS);
        assert_eq!(radio.switch_time(RadioState::Tx, RadioState::Sleep), 1.0 * MICROS);

        let empty = SwitchTimes::default();
        assert_eq!(empty.rx_to_tx(), Time::ZERO);
    }

    #[test]
    fn switch_while_switching_is_refused() {
        let mut radio = radio();
        radio.switch_to(RadioState::Tx, Time::ZERO).unwrap();

        assert_eq!(
            radio.switch_to(RadioState::Sleep, 1.0 * MICROS),
            Err(RadioError::AlreadySwitching)
        );
        assert_eq!(radio.next_state(), RadioState::Tx);
        assert_eq!(radio.current_state(), RadioState::Switching);
    }

    #[test]
    fn end_switch_needs_a_switch() {
        let mut radio = radio();
        assert_eq!(radio.end_switch(Time::ZERO), Err(RadioError::NotSwitching));
    }

    #[test]
    fn switching_is_not_a_target() {
        let mut radio = radio();
        assert_eq!(
            radio.switch_to(RadioState::Switching, Time::ZERO),
            Err(RadioError::InvalidState(RadioState::Switching))
        );
        assert_eq!(
            radio.set_switch_time(RadioState::Switching, RadioState::Rx, MICROS),
            Err(RadioError::InvalidState(RadioState::Switching))
        );
        assert_eq!(
            radio.set_switch_time(RadioState::Rx, RadioState::Tx, -MICROS),
            Err(RadioError::NegativeSwitchTime)
        );
    }

    #[test]
    fn channel_bounds() {
        let mut radio = radio();
        radio.set_current_channel(2).unwrap();
        assert_eq!(radio.current_channel(), 2);
        assert_eq!(
            radio.set_current_channel(3),
            Err(RadioError::InvalidChannel {
                channel: 3,
                nb_channels: 3
            })
        );
        assert_eq!(radio.current_channel(), 2);
    }

    #[test]
    fn attenuation_follows_state() {
        let mut radio = radio();
        radio.rsam_mut().set_tracking(true);

        radio.switch_to(RadioState::Tx, 1.0 * MILLIS).unwrap();
        radio.end_switch(1.0 * MILLIS + 3.0 * MICROS).unwrap();

        let rsam = radio.rsam();
        assert_eq!(rsam.value_at(0.5 * MILLIS), 1.0);
        assert_eq!(rsam.value_at(1.0 * MILLIS), 0.0);
        assert_eq!(rsam.value_at(2.0 * MILLIS), 0.0);

        let mapping = rsam.attenuation(Time::ZERO, 3.0 * MILLIS);
        assert_eq!(mapping.value_at(0.9 * MILLIS), 1.0);
        assert_eq!(mapping.value_at(1.5 * MILLIS), 0.0);
    }

    #[test]
    fn pending_switch_end_is_visible_ahead() {
        let mut radio = radio();
        radio.switch_to(RadioState::Sleep, Time::ZERO).unwrap();
        radio.rsam_mut().set_tracking(true);
        radio.end_switch(1.0 * MICROS).unwrap();
        radio.switch_to(RadioState::Rx, 1.0 * MILLIS).unwrap();

        let mapping = radio.rsam().attenuation(Time::ZERO, 2.0 * MILLIS);
        assert_eq!(mapping.value_at(1.0 * MILLIS + 2.0 * MICROS), 0.0);
        assert_eq!(mapping.value_at(1.0 * MILLIS + 4.0 * MICROS), 1.0);
    }

    #[test]
    fn untracked_switch_into_rx_stays_deaf_until_done() {
        let mut radio = radio();
        radio.switch_to(RadioState::Sleep, Time::ZERO).unwrap();
        radio.end_switch(1.0 * MICROS).unwrap();
        assert!(!radio.rsam().is_tracking());

        radio.switch_to(RadioState::Rx, 1.0 * MILLIS).unwrap();
        let rsam = radio.rsam();
        assert_eq!(rsam.value_at(1.0 * MILLIS), 0.0);
        assert_eq!(rsam.value_at(1.0 * MILLIS + 2.0 * MICROS), 0.0);
        assert_eq!(rsam.value_at(1.0 * MILLIS + 4.0 * MICROS), 1.0);

        radio.end_switch(1.0 * MILLIS + 4.0 * MICROS).unwrap();
        assert_eq!(radio.rsam().len(), 1);
        assert_eq!(radio.rsam().value_at(2.0 * MILLIS), 1.0);
    }

    #[test]
    fn history_dropped_when_not_tracking() {
        let mut radio = radio();
        radio.switch_to(RadioState::Tx, 1.0 * MILLIS).unwrap();
        radio.end_switch(1.0 * MILLIS + 3.0 * MICROS).unwrap();
        assert_eq!(radio.rsam().len(), 1);

        let mut tracked = radio.clone();
        tracked.rsam_mut().set_tracking(true);
        tracked.switch_to(RadioState::Rx, 2.0 * MILLIS).unwrap();
        tracked.end_switch(2.0 * MILLIS + 2.0 * MICROS).unwrap();
        assert_eq!(tracked.rsam().len(), 3);

        tracked.rsam_mut().clean_up_until(2.0 * MILLIS + 1.0 * MICROS);
        assert_eq!(tracked.rsam().len(), 2);
        assert_eq!(tracked.rsam().value_at(2.0 * MILLIS + 1.0 * MICROS), 0.0);
    }

    #[test]
    fn initial_switching_state_is_rejected() {
        let config = RadioConfig {
            initial_state: RadioState::Switching,
            ..Default::default()
        };
        assert!(Radio::new(&config).is_err());
    }
}
