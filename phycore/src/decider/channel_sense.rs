use serde::{Deserialize, Serialize};

use super::{
    Callback, ChannelState, ControlMessage, Decider, DeciderError, DeciderToPhy,
    policy::channel_sense_rssi,
};
use crate::units::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenseMode {
    /// Answer as soon as the channel is idle, or at the timeout.
    UntilIdle,
    /// Answer as soon as the channel is busy, or at the timeout.
    UntilBusy,
    /// Answer at the timeout with the peak RSSI seen.
    UntilTimeout,
}

impl SenseMode {
    fn is_fulfilled(self, idle: bool) -> bool {
        match self {
            SenseMode::UntilIdle => idle,
            SenseMode::UntilBusy => !idle,
            SenseMode::UntilTimeout => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSenseRequest {
    pub id: u32,
    pub mode: SenseMode,
    pub timeout: Time,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct PendingSense {
    request: ChannelSenseRequest,
    started: Time,
    answer_at: Time,
}

impl Decider {
    /// Handles a new request or the scheduled callback of the pending one.
    ///
    /// Only one request can be pending at a time. It is answered right away
    /// when its condition already holds, otherwise at the returned time or
    /// earlier if the channel changes in between.
    pub fn handle_channel_sense_request(
        &mut self,
        request: ChannelSenseRequest,
        phy: &mut dyn DeciderToPhy,
    ) -> Result<Callback, DeciderError> {
        let now = phy.sim_time();

        if let Some(pending) = self.sense {
            if pending.request.id != request.id {
                return Err(DeciderError::ConcurrentSenseRequest {
                    pending: pending.request.id,
                    new: request.id,
                });
            }
            self.answer_sense_request(pending, phy);
            return Ok(Callback::Done);
        }

        if !self.config.policy.supports(request.mode) {
            return Err(DeciderError::UnsupportedSenseMode(request.mode));
        }

        let pending = PendingSense {
            request,
            started: now,
            answer_at: now + request.timeout,
        };

        if request.mode.is_fulfilled(self.channel_state(phy).idle) {
            self.answer_sense_request(pending, phy);
            return Ok(Callback::Done);
        }

        self.sense = Some(pending);
        Ok(Callback::Scheduled(pending.answer_at))
    }

    pub fn pending_sense_request(&self) -> Option<ChannelSenseRequest> {
        self.sense.map(|p| p.request)
    }

    /// Re-evaluates a pending request after the channel may have changed.
    pub fn channel_changed(&mut self, phy: &mut dyn DeciderToPhy) {
        let Some(pending) = self.sense else {
            return;
        };

        let now = phy.sim_time();
        if pending.answer_at > now && pending.request.mode.is_fulfilled(self.channel_state(phy).idle) {
            log::trace!("sense request {} can be answered early", pending.request.id);
            self.sense = Some(PendingSense {
                answer_at: now,
                ..pending
            });
            phy.reschedule_sense_request(pending.request.id, now);
        }
    }

    fn answer_sense_request(&mut self, pending: PendingSense, phy: &mut dyn DeciderToPhy) {
        let now = phy.sim_time();
        let current = self.channel_state(phy);

        let frames = phy.channel_info(pending.started, now);
        let rssi = channel_sense_rssi(&frames, phy.noise_floor(), pending.started, now);

        log::debug!(
            "answering sense request {} ({:?}) idle: {} rssi: {rssi}",
            pending.request.id,
            pending.request.mode,
            current.idle
        );

        self.sense = None;
        self.stats.sense_answers += 1;
        phy.send_control_msg_to_mac(ControlMessage::ChannelSenseAnswer {
            request: pending.request,
            state: ChannelState {
                idle: current.idle,
                rssi,
            },
        });
    }
}
