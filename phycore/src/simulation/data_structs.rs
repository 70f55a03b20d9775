use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{
    config::PhyConfig,
    decider::{ChannelSenseRequest, ChannelState, DeciderResult},
    geometry::Coord,
    phy::{AirFrame, FrameId, NodeId},
    radio::RadioState,
    units::*,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioNode {
    pub position: Coord,
    /// Overrides the scenario wide physical layer configuration.
    pub phy: Option<PhyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTransmission {
    pub sender: NodeId,
    pub start: Time,
    pub duration: Time,
    /// Transmission power in mW.
    pub power: f64,
    /// Bits per second.
    pub bitrate: f64,
    pub channel: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSwitch {
    pub node: NodeId,
    pub time: Time,
    pub state: RadioState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSense {
    pub node: NodeId,
    pub time: Time,
    pub request: ChannelSenseRequest,
}

/// Everything that happens in a run apart from what the physical layers
/// decide themselves.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Scenario {
    pub phy: PhyConfig,
    pub nodes: Vec<ScenarioNode>,
    pub transmissions: Vec<ScheduledTransmission>,
    pub radio_switches: Vec<ScheduledSwitch>,
    pub sense_requests: Vec<ScheduledSense>,
}

impl Scenario {
    pub fn new(phy: PhyConfig) -> Self {
        Scenario {
            phy,
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, position: Coord) -> NodeId {
        self.nodes.push(ScenarioNode {
            position,
            phy: None,
        });
        self.nodes.len() - 1
    }

    pub fn switch_radio(&mut self, node: NodeId, time: Time, state: RadioState) {
        self.radio_switches.push(ScheduledSwitch { node, time, state });
    }

    pub fn sense(&mut self, node: NodeId, time: Time, request: ChannelSenseRequest) {
        self.sense_requests.push(ScheduledSense {
            node,
            time,
            request,
        });
    }

    /// Schedules a transmission together with the radio switches around it:
    /// to TX `lead` before the start and back to RX at the end.
    pub fn transmit(&mut self, transmission: ScheduledTransmission, lead: Time) {
        self.switch_radio(transmission.sender, transmission.start - lead, RadioState::Tx);
        self.switch_radio(
            transmission.sender,
            transmission.start + transmission.duration,
            RadioState::Rx,
        );
        self.transmissions.push(transmission);
    }
}

/// A transmission that actually went on the air.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub id: FrameId,
    pub sender: NodeId,
    pub start_time: Time,
    pub end_time: Time,
    pub channel: usize,
}

impl TransmissionRecord {
    pub fn overlaps(&self, start: Time, end: Time) -> bool {
        self.start_time < end && start < self.end_time
    }
}

/// A frame handed up by a receiver's decider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub time: Time,
    pub receiver: NodeId,
    pub frame: FrameId,
    pub reception_start: Time,
    pub reception_end: Time,
    pub result: DeciderResult,
}

impl Delivery {
    pub fn overlaps(&self, other: &Delivery) -> bool {
        self.reception_start < other.reception_end && other.reception_start < self.reception_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenseAnswer {
    pub time: Time,
    pub node: NodeId,
    pub request: ChannelSenseRequest,
    pub state: ChannelState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scalar {
    pub node: NodeId,
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimOutput {
    pub simulation_seed: u64,
    pub logs: Vec<LogItem>,
    pub transmissions: Vec<TransmissionRecord>,
    pub deliveries: Vec<Delivery>,
    pub sense_answers: Vec<SenseAnswer>,
    pub scalars: Vec<Scalar>,
}

impl SimOutput {
    pub fn scalar(&self, node: NodeId, name: &str) -> Option<f64> {
        self.scalars
            .iter()
            .find(|s| s.node == node && s.name == name)
            .map(|s| s.value)
    }
}

#[derive(Debug, Clone)]
pub struct SimEvent {
    pub time: Time,
    /// Insertion order, breaks ties between events of the same kind.
    pub sequence: u64,
    pub action: SimAction,
}

impl SimEvent {
    fn key(&self) -> (Time, u8, u64) {
        (self.time, self.action.priority(), self.sequence)
    }
}

impl PartialEq for SimEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}
impl Eq for SimEvent {}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max heap pops the earliest event first.
impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (time, priority, sequence) = self.key();
        let (other_time, other_priority, other_sequence) = other.key();

        other_time
            .total_cmp(&time)
            .then(other_priority.cmp(&priority))
            .then(other_sequence.cmp(&sequence))
    }
}

#[derive(Debug, Clone)]
pub enum SimAction {
    Transmit {
        transmission: usize,
    },
    FrameArrival {
        receiver: NodeId,
        frame: Box<AirFrame>,
    },
    ProcessSignal {
        receiver: NodeId,
        frame: FrameId,
    },
    FrameEnd {
        receiver: NodeId,
        frame: FrameId,
    },
    RadioSwitch {
        node: NodeId,
        state: RadioState,
    },
    EndRadioSwitch {
        node: NodeId,
    },
    SenseRequest {
        node: NodeId,
        request: ChannelSenseRequest,
        /// Set for callbacks the decider asked for, unset for new requests.
        callback: bool,
    },
}

impl SimAction {
    /// Order of events at the same instant: finished receptions are judged
    /// before their frame leaves the channel info, radios settle before
    /// anything is sent and frames arrive last.
    fn priority(&self) -> u8 {
        match self {
            SimAction::ProcessSignal { .. } => 0,
            SimAction::FrameEnd { .. } => 1,
            SimAction::EndRadioSwitch { .. } => 2,
            SimAction::RadioSwitch { .. } => 3,
            SimAction::SenseRequest { .. } => 4,
            SimAction::Transmit { .. } => 5,
            SimAction::FrameArrival { .. } => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogItem {
    pub time: Time,
    pub log_level: LogLevel,
    pub source: LogSource,
    pub content: LogContent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogSource {
    Simulation,
    Receiver(NodeId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogContent {
    FrameSent {
        sender_id: NodeId,
        frame_id: FrameId,
    },
    FrameDelivered {
        receiver_id: NodeId,
        frame_id: FrameId,
        correct: bool,
    },
    FrameTooWeak {
        receiver_id: NodeId,
        frame_id: FrameId,
    },
    FrameIgnoredBusy {
        receiver_id: NodeId,
        frame_id: FrameId,
    },
    ReceptionAborted {
        receiver_id: NodeId,
        frame_id: FrameId,
    },
    RadioSwitchStarted {
        node_id: NodeId,
        to: RadioState,
        duration: Time,
    },
    RadioSwitchCompleted {
        node_id: NodeId,
        state: RadioState,
    },
    RadioSwitchRefused {
        node_id: NodeId,
        to: RadioState,
    },
    TransmissionRefused {
        sender_id: NodeId,
        state: RadioState,
    },
    ChannelSenseAnswered {
        node_id: NodeId,
        request_id: u32,
        idle: bool,
    },
}

impl Display for LogContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogContent::FrameSent {
                sender_id,
                frame_id,
            } => write!(f, "Frame {} sent by node {}", frame_id, sender_id),
            LogContent::FrameDelivered {
                receiver_id,
                frame_id,
                correct,
            } => {
                let outcome = if *correct { "correctly" } else { "with errors" };
                write!(f, "Frame {} received {} at node {}", frame_id, outcome, receiver_id)
            }
            LogContent::FrameTooWeak {
                receiver_id,
                frame_id,
            } => write!(f, "Frame {} too weak at node {}", frame_id, receiver_id),
            LogContent::FrameIgnoredBusy {
                receiver_id,
                frame_id,
            } => write!(
                f,
                "Frame {} ignored at node {} while receiving another frame",
                frame_id, receiver_id
            ),
            LogContent::ReceptionAborted {
                receiver_id,
                frame_id,
            } => write!(f, "Reception of frame {} aborted at node {}", frame_id, receiver_id),
            LogContent::RadioSwitchStarted {
                node_id,
                to,
                duration,
            } => write!(
                f,
                "Radio of node {} switching to {} in {}s",
                node_id, to, duration
            ),
            LogContent::RadioSwitchCompleted { node_id, state } => {
                write!(f, "Radio of node {} now {}", node_id, state)
            }
            LogContent::RadioSwitchRefused { node_id, to } => write!(
                f,
                "Radio of node {} refused to switch to {} while switching",
                node_id, to
            ),
            LogContent::TransmissionRefused { sender_id, state } => write!(
                f,
                "Node {} can not transmit with its radio in {}",
                sender_id, state
            ),
            LogContent::ChannelSenseAnswered {
                node_id,
                request_id,
                idle,
            } => {
                let channel = if *idle { "idle" } else { "busy" };
                write!(
                    f,
                    "Sense request {} of node {} answered, channel {}",
                    request_id, node_id, channel
                )
            }
        }
    }
}
