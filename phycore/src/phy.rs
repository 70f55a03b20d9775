//! The physical layer of one network interface: radio, analogue models,
//! decider and the frames heard so far, glued together.
//!
//! Everything the layer wants from the outside world (frames to hand up,
//! control messages, rescheduled callbacks) is collected as [`PhyOutput`]
//! and drained by the host with [`PhyLayer::drain_outputs`].

pub mod channel_info;

use std::rc::Rc;

use rand::Rng;
use thiserror::Error;

use crate::{
    analogue_model::AnalogueModel,
    config::{ConfigError, PhyConfig},
    decider::{
        Callback, ChannelSenseRequest, ChannelState, ControlMessage, Decider, DeciderError,
        DeciderResult, DeciderToPhy, Rejection,
    },
    geometry::Coord,
    radio::{Radio, RadioError, RadioState},
    signal::{Signal, SignalError},
    units::Time,
};

use channel_info::ChannelInfo;

pub type FrameId = u32;
pub type NodeId = usize;

/// One transmission as seen by one receiver.
#[derive(Debug, Clone)]
pub struct AirFrame {
    pub id: FrameId,
    pub sender: NodeId,
    pub channel: usize,
    pub signal: Signal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhyError {
    #[error(transparent)]
    Decider(#[from] DeciderError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhyOutput {
    SendUp { frame: FrameId, result: DeciderResult },
    ControlMessage(ControlMessage),
    Rejected { frame: FrameId, reason: Rejection },
    RescheduleSense { request: u32, time: Time },
    CancelFrameCallback { frame: FrameId },
    Scalar { name: String, value: f64 },
}

#[derive(Debug, Default)]
struct PhyEnv {
    now: Time,
    noise_floor: f64,
    channel_info: ChannelInfo,
    outbox: Vec<PhyOutput>,
}

impl DeciderToPhy for PhyEnv {
    fn sim_time(&self) -> Time {
        self.now
    }

    fn channel_info(&self, start: Time, end: Time) -> Vec<Rc<AirFrame>> {
        self.channel_info.frames(start, end)
    }

    fn noise_floor(&self) -> f64 {
        self.noise_floor
    }

    fn send_up(&mut self, frame: &Rc<AirFrame>, result: DeciderResult) {
        self.outbox.push(PhyOutput::SendUp {
            frame: frame.id,
            result,
        });
    }

    fn send_control_msg_to_mac(&mut self, msg: ControlMessage) {
        self.outbox.push(PhyOutput::ControlMessage(msg));
    }

    fn reschedule_sense_request(&mut self, request: u32, time: Time) {
        self.outbox.push(PhyOutput::RescheduleSense { request, time });
    }

    fn record_scalar(&mut self, name: &str, value: f64) {
        self.outbox.push(PhyOutput::Scalar {
            name: name.to_owned(),
            value,
        });
    }

    fn frame_rejected(&mut self, frame: &Rc<AirFrame>, reason: Rejection) {
        self.outbox.push(PhyOutput::Rejected {
            frame: frame.id,
            reason,
        });
    }
}

#[derive(Debug)]
pub struct PhyLayer {
    decider: Decider,
    radio: Radio,
    analogue_models: Vec<AnalogueModel>,
    use_radio_gating: bool,
    env: PhyEnv,
}

impl PhyLayer {
    pub fn new(config: &PhyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(PhyLayer {
            decider: Decider::new(config.decider.clone())?,
            radio: Radio::new(&config.radio)?,
            analogue_models: config.analogue_models.clone(),
            use_radio_gating: config.use_radio_gating,
            env: PhyEnv {
                noise_floor: config.noise_floor,
                ..Default::default()
            },
        })
    }

    pub fn radio(&self) -> &Radio {
        &self.radio
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio.current_state()
    }

    pub fn decider(&self) -> &Decider {
        &self.decider
    }

    pub fn channel_info(&self) -> &ChannelInfo {
        &self.env.channel_info
    }

    pub fn channel_state(&mut self, now: Time) -> ChannelState {
        self.env.now = now;
        self.decider.channel_state(&self.env)
    }

    /// Applies the radio state gating (when enabled) and then every analogue
    /// model in order.
    pub fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        sender: &Coord,
        receiver: &Coord,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        if self.use_radio_gating {
            signal.add_attenuation(
                self.radio
                    .rsam()
                    .attenuation(signal.reception_start(), signal.reception_end()),
            );
        }

        for model in &self.analogue_models {
            model.filter_signal(signal, sender, receiver, rng)?;
        }

        Ok(())
    }

    /// A frame starts arriving. Returns when the decider wants to see it
    /// again.
    pub fn receive_frame<R: Rng + ?Sized>(
        &mut self,
        mut frame: AirFrame,
        sender: &Coord,
        receiver: &Coord,
        now: Time,
        rng: &mut R,
    ) -> Result<Callback, PhyError> {
        self.env.now = now;

        if frame.channel != self.radio.current_channel() {
            log::trace!(
                "frame {} on channel {} ignored, listening on {}",
                frame.id,
                frame.channel,
                self.radio.current_channel()
            );
            return Ok(Callback::Done);
        }

        self.filter_signal(&mut frame.signal, sender, receiver, rng)?;

        let frame = Rc::new(frame);
        self.env.channel_info.add_frame(Rc::clone(&frame));
        self.radio.rsam_mut().set_tracking(true);

        self.decider.channel_changed(&mut self.env);
        Ok(self.decider.process_signal(&frame, &mut self.env)?)
    }

    /// The decider asked to see `frame` again at `now`.
    pub fn process_callback(&mut self, frame: FrameId, now: Time) -> Result<Callback, PhyError> {
        self.env.now = now;

        let frame = self
            .env
            .channel_info
            .get(frame)
            .cloned()
            .ok_or(DeciderError::UnknownSignal { frame })?;

        Ok(self.decider.process_signal(&frame, &mut self.env)?)
    }

    /// The reception of `frame` is over.
    pub fn frame_ended(&mut self, frame: FrameId, now: Time) {
        self.env.now = now;

        if !self.env.channel_info.remove_frame(frame) {
            return;
        }

        self.stop_tracking_if_silent(now);
        self.decider.channel_changed(&mut self.env);
    }

    fn stop_tracking_if_silent(&mut self, now: Time) {
        if self.env.channel_info.is_empty() {
            let rsam = self.radio.rsam_mut();
            rsam.set_tracking(false);
            rsam.clean_up_until(now);
        }
    }

    pub fn handle_sense_request(
        &mut self,
        request: ChannelSenseRequest,
        now: Time,
    ) -> Result<Callback, PhyError> {
        self.env.now = now;
        Ok(self
            .decider
            .handle_channel_sense_request(request, &mut self.env)?)
    }

    /// Starts switching the radio and returns the switch duration. A zero
    /// length switch is completed right away. Leaving RX aborts the
    /// reception in progress.
    pub fn set_radio_state(&mut self, new_state: RadioState, now: Time) -> Result<Time, PhyError> {
        self.env.now = now;

        let leaving_rx = self.radio.current_state() == RadioState::Rx && new_state != RadioState::Rx;
        let duration = self.radio.switch_to(new_state, now)?;

        if leaving_rx {
            if let Some(frame) = self.decider.abort_reception(&mut self.env) {
                self.env.outbox.push(PhyOutput::CancelFrameCallback { frame });
            }
        }

        if duration == Time::ZERO {
            self.radio.end_switch(now)?;
        }

        Ok(duration)
    }

    pub fn end_radio_switch(&mut self, now: Time) -> Result<(), PhyError> {
        self.env.now = now;
        Ok(self.radio.end_switch(now)?)
    }

    /// Tunes the radio to `channel`. Frames heard on the old channel are
    /// forgotten and a reception in progress is aborted.
    pub fn set_current_channel(&mut self, channel: usize, now: Time) -> Result<(), PhyError> {
        self.env.now = now;

        let old = self.radio.current_channel();
        self.radio.set_current_channel(channel)?;
        if old == channel {
            return Ok(());
        }

        log::trace!("radio tuned from channel {old} to {channel}");
        self.env.channel_info.retain_channel(channel);
        self.stop_tracking_if_silent(now);

        match self.decider.abort_reception(&mut self.env) {
            Some(frame) => self.env.outbox.push(PhyOutput::CancelFrameCallback { frame }),
            None => self.decider.channel_changed(&mut self.env),
        }

        Ok(())
    }

    /// Records the decider counters.
    pub fn finish(&mut self, now: Time) {
        self.env.now = now;
        self.decider.finish(&mut self.env);
    }

    pub fn drain_outputs(&mut self) -> Vec<PhyOutput> {
        std::mem::take(&mut self.env.outbox)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    use super::*;
    use crate::{
        analogue_model::{PacketErrorRate, SimplePathloss},
        decider::{AcceptancePolicy, DeciderConfig, SenseMode},
        radio::{RadioConfig, SwitchTimes},
        units::{Frequency, MICROS, MILLIS},
    };

    fn config() -> PhyConfig {
        PhyConfig {
            decider: DeciderConfig {
                sensitivity: 1e-9,
                policy: AcceptancePolicy::SnrThreshold {
                    snr_threshold: 10.0,
                    busy_threshold: 1e-9,
                },
                header: None,
            },
            analogue_models: vec![SimplePathloss::new(2.0, Frequency::from_GHz(5.89)).unwrap().into()],
            radio: RadioConfig {
                switch_times: SwitchTimes {
                    rx_to_tx: Some(10.0 * MICROS),
                    ..Default::default()
                },
                nb_channels: 2,
                ..Default::default()
            },
            noise_floor: 1e-11,
            use_propagation_delay: true,
            use_radio_gating: true,
        }
    }

    fn air_frame(id: FrameId, start: Time, channel: usize) -> AirFrame {
        AirFrame {
            id,
            sender: 1,
            channel,
            signal: Signal::rectangular(start, 1.0 * MILLIS, 20.0, 6e6),
        }
    }

    #[test]
    fn clean_reception_is_sent_up() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        let callback = phy
            .receive_frame(
                air_frame(1, Time::ZERO, 0),
                &Coord::planar(0.0, 0.0),
                &Coord::planar(50.0, 0.0),
                Time::ZERO,
                &mut rng,
            )
            .unwrap();
        assert_eq!(callback, Callback::Scheduled(1.0 * MILLIS));

        assert_eq!(phy.process_callback(1, 1.0 * MILLIS).unwrap(), Callback::Done);
        phy.frame_ended(1, 1.0 * MILLIS);

        let outputs = phy.drain_outputs();
        assert!(matches!(
            outputs.as_slice(),
            [PhyOutput::SendUp { frame: 1, result }] if result.is_signal_correct()
        ));
        assert!(phy.channel_info().is_empty());
        assert!(!phy.radio().rsam().is_tracking());
    }

    #[test]
    fn other_channel_is_ignored() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        let callback = phy
            .receive_frame(
                air_frame(1, Time::ZERO, 1),
                &Coord::ZERO,
                &Coord::planar(10.0, 0.0),
                Time::ZERO,
                &mut rng,
            )
            .unwrap();
        assert_eq!(callback, Callback::Done);
        assert!(phy.channel_info().is_empty());

        phy.set_current_channel(1, Time::ZERO).unwrap();
        assert!(phy.set_current_channel(2, Time::ZERO).is_err());
    }

    #[test]
    fn sleeping_radio_hears_nothing() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        assert_eq!(phy.set_radio_state(RadioState::Sleep, Time::ZERO).unwrap(), Time::ZERO);
        assert_eq!(phy.radio_state(), RadioState::Sleep);

        let callback = phy
            .receive_frame(
                air_frame(1, 1.0 * MILLIS, 0),
                &Coord::ZERO,
                &Coord::planar(10.0, 0.0),
                1.0 * MILLIS,
                &mut rng,
            )
            .unwrap();
        assert_eq!(callback, Callback::Done);
        assert_eq!(
            phy.drain_outputs(),
            vec![PhyOutput::Rejected {
                frame: 1,
                reason: Rejection::TooWeak
            }]
        );
    }

    #[test]
    fn switching_to_tx_aborts_reception() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        phy.receive_frame(
            air_frame(1, Time::ZERO, 0),
            &Coord::ZERO,
            &Coord::planar(10.0, 0.0),
            Time::ZERO,
            &mut rng,
        )
        .unwrap();
        assert!(phy.decider().is_receiving());

        let duration = phy.set_radio_state(RadioState::Tx, 0.5 * MILLIS).unwrap();
        assert_eq!(duration, 10.0 * MICROS);
        assert_eq!(phy.radio_state(), RadioState::Switching);
        assert!(!phy.decider().is_receiving());
        assert_eq!(
            phy.drain_outputs(),
            vec![PhyOutput::CancelFrameCallback { frame: 1 }]
        );

        assert!(matches!(
            phy.set_radio_state(RadioState::Rx, 0.505 * MILLIS),
            Err(PhyError::Radio(RadioError::AlreadySwitching))
        ));
        phy.end_radio_switch(0.5 * MILLIS + 10.0 * MICROS).unwrap();
        assert_eq!(phy.radio_state(), RadioState::Tx);
    }

    #[test]
    fn changing_channel_aborts_reception() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        phy.receive_frame(
            air_frame(1, Time::ZERO, 0),
            &Coord::ZERO,
            &Coord::planar(10.0, 0.0),
            Time::ZERO,
            &mut rng,
        )
        .unwrap();
        assert!(phy.decider().is_receiving());

        phy.set_current_channel(1, 0.4 * MILLIS).unwrap();
        assert!(!phy.decider().is_receiving());
        assert!(phy.channel_info().is_empty());
        assert_eq!(
            phy.drain_outputs(),
            vec![PhyOutput::CancelFrameCallback { frame: 1 }]
        );

        assert_eq!(
            phy.process_callback(1, 1.0 * MILLIS),
            Err(PhyError::Decider(DeciderError::UnknownSignal { frame: 1 }))
        );
        phy.frame_ended(1, 1.0 * MILLIS);
        assert!(phy.drain_outputs().is_empty());
    }

    #[test]
    fn switching_into_rx_hears_nothing_until_done() {
        let mut config = config();
        config.radio.initial_state = RadioState::Sleep;
        config.radio.switch_times.sleep_to_rx = Some(100.0 * MICROS);
        let mut phy = PhyLayer::new(&config).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        let duration = phy.set_radio_state(RadioState::Rx, 1.0 * MILLIS).unwrap();
        assert_eq!(duration, 100.0 * MICROS);
        assert_eq!(phy.radio().rsam().value_at(1.05 * MILLIS), 0.0);

        let callback = phy
            .receive_frame(
                air_frame(1, 1.01 * MILLIS, 0),
                &Coord::ZERO,
                &Coord::planar(10.0, 0.0),
                1.01 * MILLIS,
                &mut rng,
            )
            .unwrap();
        assert_eq!(callback, Callback::Done);
        assert_eq!(phy.radio_state(), RadioState::Switching);
    }

    #[test]
    fn callback_for_unknown_frame() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        assert_eq!(
            phy.process_callback(3, Time::ZERO),
            Err(PhyError::Decider(DeciderError::UnknownSignal { frame: 3 }))
        );
    }

    #[test]
    fn lost_frames_still_interfere() {
        let mut config = config();
        config.analogue_models.push(PacketErrorRate::new(0.0).unwrap().into());
        let mut phy = PhyLayer::new(&config).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        phy.receive_frame(
            air_frame(1, Time::ZERO, 0),
            &Coord::ZERO,
            &Coord::planar(10.0, 0.0),
            Time::ZERO,
            &mut rng,
        )
        .unwrap();
        phy.receive_frame(
            air_frame(2, 0.5 * MILLIS, 0),
            &Coord::planar(20.0, 0.0),
            &Coord::planar(10.0, 0.0),
            0.5 * MILLIS,
            &mut rng,
        )
        .unwrap();

        phy.process_callback(1, 1.0 * MILLIS).unwrap();
        let outputs = phy.drain_outputs();
        let delivered = outputs
            .iter()
            .find_map(|o| match o {
                PhyOutput::SendUp { frame: 1, result } => Some(*result),
                _ => None,
            })
            .unwrap();
        assert!(!delivered.is_signal_correct());
    }

    #[test]
    fn sense_request_answered_through_outbox() {
        let mut phy = PhyLayer::new(&config()).unwrap();
        let request = ChannelSenseRequest {
            id: 1,
            mode: SenseMode::UntilIdle,
            timeout: 1.0 * MILLIS,
        };

        assert_eq!(phy.handle_sense_request(request, Time::ZERO).unwrap(), Callback::Done);
        assert!(matches!(
            phy.drain_outputs().as_slice(),
            [PhyOutput::ControlMessage(ControlMessage::ChannelSenseAnswer { .. })]
        ));
        assert!(phy.channel_state(Time::ZERO).idle);
    }
}
