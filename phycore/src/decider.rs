//! Receiver side decision whether a frame on the air is received correctly.
//!
//! The decider follows at most one frame at a time. It is called with the
//! frame when the frame starts arriving and then again at every time it
//! asked for through [`Callback::Scheduled`]:
//!
//! * new frame: rejected if another frame is tracked or its power at the
//!   reception start is below the sensitivity, otherwise tracked with a
//!   wake up at the header end (if a header check is configured) or the
//!   reception end.
//! * header end: the header SNR is checked, a failure ends the reception.
//! * reception end: the [`AcceptancePolicy`] judges the whole reception and
//!   the frame is handed up with the result, correct or not.

pub mod channel_sense;
pub mod policy;

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::ConfigError,
    phy::{AirFrame, FrameId},
    units::{Power, Time},
};

use channel_sense::PendingSense;
pub use channel_sense::{ChannelSenseRequest, SenseMode};
use policy::channel_sense_rssi;
pub use policy::{AcceptancePolicy, HeaderCheck};

/// What the decider wants after handling a frame or a sense request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callback {
    /// Call again with the same frame or request at this time.
    Scheduled(Time),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    New,
    ExpectHeader,
    ExpectEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeciderResult {
    pub correct: bool,
    /// Lowest linear SNR seen over the judged window.
    pub min_snr: f64,
    pub bitrate: f64,
}

impl DeciderResult {
    pub fn is_signal_correct(&self) -> bool {
        self.correct
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub idle: bool,
    /// Total power on the channel in mW, noise included.
    pub rssi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    TooWeak,
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ChannelSenseAnswer {
        request: ChannelSenseRequest,
        state: ChannelState,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeciderError {
    #[error("frame {frame} was presented in an unknown state")]
    UnknownSignal { frame: FrameId },
    #[error("sense request {new} arrived while request {pending} is pending")]
    ConcurrentSenseRequest { pending: u32, new: u32 },
    #[error("sense mode {0:?} is not supported by the acceptance policy")]
    UnsupportedSenseMode(SenseMode),
    #[error("frame {frame} expects a header check but none is configured")]
    HeaderNotSupported { frame: FrameId },
}

/// What the decider needs from the layer hosting it.
pub trait DeciderToPhy {
    fn sim_time(&self) -> Time;

    /// Every frame on the current channel whose reception overlaps
    /// `[start, end]`.
    fn channel_info(&self, start: Time, end: Time) -> Vec<Rc<AirFrame>>;

    /// Thermal noise in mW.
    fn noise_floor(&self) -> f64;

    fn send_up(&mut self, frame: &Rc<AirFrame>, result: DeciderResult);

    fn send_control_msg_to_mac(&mut self, msg: ControlMessage);

    /// Moves the callback of a pending sense request to `time`.
    fn reschedule_sense_request(&mut self, request: u32, time: Time);

    fn record_scalar(&mut self, name: &str, value: f64);

    fn frame_rejected(&mut self, _frame: &Rc<AirFrame>, _reason: Rejection) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeciderConfig {
    /// Minimum received power in mW at the reception start.
    pub sensitivity: f64,
    pub policy: AcceptancePolicy,
    pub header: Option<HeaderCheck>,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        DeciderConfig {
            sensitivity: Power::from_dbm(-89.0).mw(),
            policy: AcceptancePolicy::AcceptAll,
            header: None,
        }
    }
}

impl DeciderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sensitivity.is_finite() && self.sensitivity >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                model: "Decider",
                parameter: "sensitivity",
                value: self.sensitivity,
            });
        }

        if let AcceptancePolicy::SnrThreshold {
            snr_threshold,
            busy_threshold,
        } = self.policy
        {
            for (name, value) in [("snr_threshold", snr_threshold), ("busy_threshold", busy_threshold)] {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(ConfigError::InvalidParameter {
                        model: "SnrThreshold",
                        parameter: name,
                        value,
                    });
                }
            }
        }

        if let Some(header) = self.header {
            if !(header.header_duration.is_finite() && header.header_duration >= Time::ZERO) {
                return Err(ConfigError::InvalidParameter {
                    model: "HeaderCheck",
                    parameter: "header_duration",
                    value: header.header_duration.seconds(),
                });
            }
            if !(header.snr_threshold.is_finite() && header.snr_threshold >= 0.0) {
                return Err(ConfigError::InvalidParameter {
                    model: "HeaderCheck",
                    parameter: "snr_threshold",
                    value: header.snr_threshold,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeciderStats {
    pub correct: u64,
    pub snr_failures: u64,
    pub header_failures: u64,
    pub too_weak: u64,
    pub busy: u64,
    pub aborted: u64,
    pub sense_answers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    End,
}

#[derive(Debug)]
struct Tracked {
    frame: Rc<AirFrame>,
    phase: Phase,
    wake: Time,
}

#[derive(Debug)]
pub struct Decider {
    config: DeciderConfig,
    current: Option<Tracked>,
    /// Frames handled already, with their reception end.
    retired: Vec<(FrameId, Time)>,
    sense: Option<PendingSense>,
    stats: DeciderStats,
}

impl Decider {
    pub fn new(config: DeciderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Decider {
            config,
            current: None,
            retired: Vec::new(),
            sense: None,
            stats: DeciderStats::default(),
        })
    }

    pub fn config(&self) -> &DeciderConfig {
        &self.config
    }

    pub fn stats(&self) -> DeciderStats {
        self.stats
    }

    /// Frames already past the header phase are not affected.
    pub fn set_header_check(&mut self, header: Option<HeaderCheck>) {
        self.config.header = header;
    }

    pub fn tracked_frame(&self) -> Option<&Rc<AirFrame>> {
        self.current.as_ref().map(|t| &t.frame)
    }

    pub fn is_receiving(&self) -> bool {
        self.current.is_some()
    }

    pub fn signal_state(&self, frame: &AirFrame) -> SignalState {
        match &self.current {
            Some(tracked) if tracked.frame.id == frame.id => match tracked.phase {
                Phase::Header => SignalState::ExpectHeader,
                Phase::End => SignalState::ExpectEnd,
            },
            _ => SignalState::New,
        }
    }

    pub fn process_signal(
        &mut self,
        frame: &Rc<AirFrame>,
        phy: &mut dyn DeciderToPhy,
    ) -> Result<Callback, DeciderError> {
        let now = phy.sim_time();
        self.retired.retain(|(_, end)| *end >= now);

        match self.signal_state(frame) {
            SignalState::New => {
                if self.retired.iter().any(|(id, _)| *id == frame.id) {
                    return Err(DeciderError::UnknownSignal { frame: frame.id });
                }
                Ok(self.process_new_signal(frame, phy))
            }
            state => {
                if self.current.as_ref().is_some_and(|t| now < t.wake) {
                    return Err(DeciderError::UnknownSignal { frame: frame.id });
                }
                if state == SignalState::ExpectHeader {
                    self.process_signal_header(phy)
                } else {
                    Ok(self.process_signal_end(phy))
                }
            }
        }
    }

    fn process_new_signal(&mut self, frame: &Rc<AirFrame>, phy: &mut dyn DeciderToPhy) -> Callback {
        if let Some(tracked) = &self.current {
            log::debug!(
                "ignoring frame {} while receiving frame {}",
                frame.id,
                tracked.frame.id
            );
            self.stats.busy += 1;
            self.retire(frame);
            phy.frame_rejected(frame, Rejection::Busy);
            return Callback::Done;
        }

        let signal = &frame.signal;
        let power = signal.received_power_at(signal.reception_start());
        if !(power >= self.config.sensitivity) {
            log::debug!(
                "frame {} too weak: {power} mW < {} mW",
                frame.id,
                self.config.sensitivity
            );
            self.stats.too_weak += 1;
            self.retire(frame);
            phy.frame_rejected(frame, Rejection::TooWeak);
            return Callback::Done;
        }

        let end = signal.reception_end();
        let (phase, wake) = match self.config.header {
            Some(header) => (Phase::Header, (signal.reception_start() + header.header_duration).min(end)),
            None => (Phase::End, end),
        };

        log::debug!("receiving frame {} until {wake}", frame.id);
        self.current = Some(Tracked {
            frame: Rc::clone(frame),
            phase,
            wake,
        });
        self.channel_changed(phy);

        Callback::Scheduled(wake)
    }

    fn process_signal_header(&mut self, phy: &mut dyn DeciderToPhy) -> Result<Callback, DeciderError> {
        let Some(tracked) = self.current.as_mut() else {
            return Ok(Callback::Done);
        };
        let frame = Rc::clone(&tracked.frame);

        let Some(header) = self.config.header else {
            return Err(DeciderError::HeaderNotSupported { frame: frame.id });
        };

        let start = frame.signal.reception_start();
        let header_end = tracked.wake;
        let interferers = phy.channel_info(start, header_end);
        let min_snr = policy::min_snr(&frame, &interferers, phy.noise_floor(), start, header_end);

        if min_snr >= header.snr_threshold {
            let end = frame.signal.reception_end();
            tracked.phase = Phase::End;
            tracked.wake = end;
            return Ok(Callback::Scheduled(end));
        }

        log::debug!("header of frame {} failed with snr {min_snr}", frame.id);
        self.stats.header_failures += 1;

        let result = DeciderResult {
            correct: false,
            min_snr,
            bitrate: frame.signal.bitrate().map_or(0.0, |b| b.value_at(start)),
        };
        phy.send_up(&frame, result);
        self.end_reception(&frame, phy);

        Ok(Callback::Done)
    }

    fn process_signal_end(&mut self, phy: &mut dyn DeciderToPhy) -> Callback {
        let Some(tracked) = self.current.as_ref() else {
            return Callback::Done;
        };
        let frame = Rc::clone(&tracked.frame);

        let start = frame.signal.reception_start();
        let end = frame.signal.reception_end();
        let interferers = phy.channel_info(start, end);
        let result = self
            .config
            .policy
            .evaluate(&frame, &interferers, phy.noise_floor(), start, end);

        if result.is_signal_correct() {
            self.stats.correct += 1;
        } else {
            log::debug!("frame {} failed with snr {}", frame.id, result.min_snr);
            self.stats.snr_failures += 1;
        }

        phy.send_up(&frame, result);
        self.end_reception(&frame, phy);

        Callback::Done
    }

    /// Stops following the tracked frame without handing it up.
    ///
    /// Returns the id of the frame so its callback can be cancelled.
    pub fn abort_reception(&mut self, phy: &mut dyn DeciderToPhy) -> Option<FrameId> {
        let tracked = self.current.take()?;
        log::debug!("aborting reception of frame {}", tracked.frame.id);

        self.stats.aborted += 1;
        self.retire(&tracked.frame);
        self.channel_changed(phy);

        Some(tracked.frame.id)
    }

    pub fn channel_state(&self, phy: &dyn DeciderToPhy) -> ChannelState {
        let now = phy.sim_time();
        let frames = phy.channel_info(now, now);
        let rssi = channel_sense_rssi(&frames, phy.noise_floor(), now, now);

        ChannelState {
            idle: self.config.policy.is_idle(self.is_receiving(), rssi),
            rssi,
        }
    }

    /// Records the reception counters.
    pub fn finish(&self, phy: &mut dyn DeciderToPhy) {
        let stats = self.stats;
        for (name, value) in [
            ("frames_correct", stats.correct),
            ("frames_snr_failed", stats.snr_failures),
            ("frames_header_failed", stats.header_failures),
            ("frames_too_weak", stats.too_weak),
            ("frames_ignored_busy", stats.busy),
            ("receptions_aborted", stats.aborted),
            ("sense_requests_answered", stats.sense_answers),
        ] {
            phy.record_scalar(name, value as f64);
        }
    }

    fn end_reception(&mut self, frame: &AirFrame, phy: &mut dyn DeciderToPhy) {
        self.retire(frame);
        self.current = None;
        self.channel_changed(phy);
    }

    fn retire(&mut self, frame: &AirFrame) {
        self.retired.push((frame.id, frame.signal.reception_end()));
    }
}
