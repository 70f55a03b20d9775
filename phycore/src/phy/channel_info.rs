use std::rc::Rc;

use super::{AirFrame, FrameId};
use crate::units::Time;

fn overlaps(a: &AirFrame, b: &AirFrame) -> bool {
    a.signal.reception_start() < b.signal.reception_end()
        && b.signal.reception_start() < a.signal.reception_end()
}

/// Frames a receiver has heard, kept for interference computation.
///
/// A frame is active until its reception ends. After that it is kept only
/// while it overlaps some active frame.
#[derive(Debug, Default)]
pub struct ChannelInfo {
    active: Vec<Rc<AirFrame>>,
    inactive: Vec<Rc<AirFrame>>,
}

impl ChannelInfo {
    pub fn add_frame(&mut self, frame: Rc<AirFrame>) {
        self.active.push(frame);
    }

    /// Marks the frame as ended. Returns false if it was not active.
    pub fn remove_frame(&mut self, id: FrameId) -> bool {
        let Some(n) = self.active.iter().position(|f| f.id == id) else {
            return false;
        };

        let frame = self.active.swap_remove(n);
        self.inactive.push(frame);

        let active = &self.active;
        self.inactive
            .retain(|old| active.iter().any(|a| overlaps(old, a)));

        true
    }

    /// Forgets every frame not on `channel`.
    pub fn retain_channel(&mut self, channel: usize) {
        self.active.retain(|f| f.channel == channel);
        self.inactive.retain(|f| f.channel == channel);
    }

    /// Frames whose reception overlaps the closed interval `[start, end]`.
    pub fn frames(&self, start: Time, end: Time) -> Vec<Rc<AirFrame>> {
        self.active
            .iter()
            .chain(self.inactive.iter())
            .filter(|f| f.signal.reception_start() <= end && f.signal.reception_end() > start)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: FrameId) -> Option<&Rc<AirFrame>> {
        self.active
            .iter()
            .chain(self.inactive.iter())
            .find(|f| f.id == id)
    }

    pub fn is_active(&self, id: FrameId) -> bool {
        self.active.iter().any(|f| f.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }
}
