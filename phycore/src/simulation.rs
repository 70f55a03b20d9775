//! A discrete event harness that drives one [`PhyLayer`] per node.
//!
//! Scheduled transmissions are copied to every other node with their own
//! propagation delay. The decider callbacks each layer asks for become
//! events, and callbacks that were moved or cancelled in the meantime are
//! skipped when they come up.

use std::collections::{BinaryHeap, HashMap};

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use thiserror::Error;

use crate::{
    config::ConfigError,
    decider::{Callback, ChannelSenseRequest, ControlMessage, Rejection},
    geometry::Coord,
    phy::{AirFrame, FrameId, NodeId, PhyError, PhyLayer, PhyOutput},
    radio::{RadioError, RadioState},
    signal::Signal,
    units::*,
};

use data_structs::{
    Delivery, LogContent, LogItem, LogLevel, LogSource, Scalar, Scenario, SenseAnswer, SimAction,
    SimEvent, SimOutput, TransmissionRecord,
};

pub mod data_structs;

type EventQueue = BinaryHeap<SimEvent>;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Phy(#[from] PhyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
}

pub fn run_simulation(
    random_seed: u64,
    scenario: Scenario,
    do_phy_logs: bool,
) -> Result<SimOutput, SimulationError> {
    let mut sim = Simulation::new(scenario, random_seed, do_phy_logs)?;

    while !sim.finished() {
        sim.step()?;
    }

    Ok(sim.finish(random_seed))
}

#[derive(Debug)]
struct Node {
    position: Coord,
    phy: PhyLayer,
    use_propagation_delay: bool,
}

#[derive(Debug)]
pub struct Simulation {
    pub sim_time: Time,
    event_queue: EventQueue,
    next_sequence: u64,
    nodes: Vec<Node>,
    scenario: Scenario,
    next_frame_id: FrameId,

    /// Time of the live decider callback per (receiver, frame).
    frame_callbacks: HashMap<(NodeId, FrameId), Time>,
    /// Time of the live sense callback per (node, request).
    sense_callbacks: HashMap<(NodeId, u32), Time>,
    /// Reception window per (receiver, frame).
    arrivals: HashMap<(NodeId, FrameId), (Time, Time)>,

    pub logs: Vec<LogItem>,
    pub transmissions: Vec<TransmissionRecord>,
    pub deliveries: Vec<Delivery>,
    pub sense_answers: Vec<SenseAnswer>,
    pub scalars: Vec<Scalar>,

    do_phy_logs: bool,
    rng: ChaCha12Rng,
}

impl Simulation {
    pub fn new(
        scenario: Scenario,
        random_seed: u64,
        do_phy_logs: bool,
    ) -> Result<Self, SimulationError> {
        let nodes = scenario
            .nodes
            .iter()
            .map(|node| {
                let config = node.phy.as_ref().unwrap_or(&scenario.phy);
                Ok(Node {
                    position: node.position,
                    phy: PhyLayer::new(config)?,
                    use_propagation_delay: config.use_propagation_delay,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let mut sim = Simulation {
            sim_time: Time::ZERO,
            event_queue: BinaryHeap::new(),
            next_sequence: 0,
            nodes,
            scenario,
            next_frame_id: 0,
            frame_callbacks: HashMap::new(),
            sense_callbacks: HashMap::new(),
            arrivals: HashMap::new(),
            logs: Vec::new(),
            transmissions: Vec::new(),
            deliveries: Vec::new(),
            sense_answers: Vec::new(),
            scalars: Vec::new(),
            do_phy_logs,
            rng: ChaCha12Rng::seed_from_u64(random_seed),
        };

        sim.enqueue_scenario()?;
        Ok(sim)
    }

    fn enqueue_scenario(&mut self) -> Result<(), SimulationError> {
        let mut events = Vec::new();

        for (n, transmission) in self.scenario.transmissions.iter().enumerate() {
            self.check_node(transmission.sender)?;
            events.push((transmission.start, SimAction::Transmit { transmission: n }));
        }
        for switch in &self.scenario.radio_switches {
            self.check_node(switch.node)?;
            events.push((
                switch.time,
                SimAction::RadioSwitch {
                    node: switch.node,
                    state: switch.state,
                },
            ));
        }
        for sense in &self.scenario.sense_requests {
            self.check_node(sense.node)?;
            events.push((
                sense.time,
                SimAction::SenseRequest {
                    node: sense.node,
                    request: sense.request,
                    callback: false,
                },
            ));
        }

        for (time, action) in events {
            self.push_event(time, action);
        }

        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<(), SimulationError> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(SimulationError::UnknownNode(node))
        }
    }

    fn push_event(&mut self, time: Time, action: SimAction) {
        self.event_queue.push(SimEvent {
            time,
            sequence: self.next_sequence,
            action,
        });
        self.next_sequence += 1;
    }

    /// Returns true if there are no more events to process
    /// (meaning the simulation is complete) false otherwise.
    pub fn finished(&self) -> bool {
        self.event_queue.is_empty()
    }

    pub fn phy(&self, node: NodeId) -> Option<&PhyLayer> {
        self.nodes.get(node).map(|n| &n.phy)
    }

    pub fn step(&mut self) -> Result<(), SimulationError> {
        let Some(event) = self.event_queue.pop() else {
            return Ok(());
        };

        self.sim_time = event.time;
        let now = self.sim_time;

        match event.action {
            SimAction::Transmit { transmission } => self.transmit(transmission)?,
            SimAction::FrameArrival { receiver, frame } => {
                let frame_id = frame.id;
                let end = frame.signal.reception_end();
                let sender_position = self.nodes[frame.sender].position;

                let node = &mut self.nodes[receiver];
                let callback = node.phy.receive_frame(
                    *frame,
                    &sender_position,
                    &node.position,
                    now,
                    &mut self.rng,
                )?;

                self.handle_outputs(receiver);
                self.schedule_frame_callback(receiver, frame_id, callback);
                self.push_event(
                    end,
                    SimAction::FrameEnd {
                        receiver,
                        frame: frame_id,
                    },
                );
            }
            SimAction::ProcessSignal { receiver, frame } => {
                if self.frame_callbacks.get(&(receiver, frame)) != Some(&now) {
                    log::trace!("stale callback for frame {frame} at node {receiver}");
                    return Ok(());
                }
                self.frame_callbacks.remove(&(receiver, frame));

                let callback = self.nodes[receiver].phy.process_callback(frame, now)?;
                self.handle_outputs(receiver);
                self.schedule_frame_callback(receiver, frame, callback);
            }
            SimAction::FrameEnd { receiver, frame } => {
                self.nodes[receiver].phy.frame_ended(frame, now);
                self.arrivals.remove(&(receiver, frame));
                self.handle_outputs(receiver);
            }
            SimAction::RadioSwitch { node, state } => {
                match self.nodes[node].phy.set_radio_state(state, now) {
                    Ok(duration) => {
                        self.log_phy(
                            node,
                            LogContent::RadioSwitchStarted {
                                node_id: node,
                                to: state,
                                duration,
                            },
                            LogLevel::Debug,
                        );
                        if duration > Time::ZERO {
                            self.push_event(now + duration, SimAction::EndRadioSwitch { node });
                        } else {
                            self.log_phy(
                                node,
                                LogContent::RadioSwitchCompleted {
                                    node_id: node,
                                    state,
                                },
                                LogLevel::Debug,
                            );
                        }
                    }
                    Err(PhyError::Radio(RadioError::AlreadySwitching)) => {
                        self.log_phy(
                            node,
                            LogContent::RadioSwitchRefused { node_id: node, to: state },
                            LogLevel::Error,
                        );
                    }
                    Err(err) => return Err(err.into()),
                }
                self.handle_outputs(node);
            }
            SimAction::EndRadioSwitch { node } => {
                self.nodes[node].phy.end_radio_switch(now)?;
                let state = self.nodes[node].phy.radio_state();
                self.log_phy(
                    node,
                    LogContent::RadioSwitchCompleted {
                        node_id: node,
                        state,
                    },
                    LogLevel::Debug,
                );
            }
            SimAction::SenseRequest {
                node,
                request,
                callback,
            } => {
                if callback {
                    if self.sense_callbacks.get(&(node, request.id)) != Some(&now) {
                        return Ok(());
                    }
                    self.sense_callbacks.remove(&(node, request.id));
                }

                let result = self.nodes[node].phy.handle_sense_request(request, now)?;
                self.handle_outputs(node);
                if let Callback::Scheduled(time) = result {
                    self.schedule_sense_callback(node, request, time);
                }
            }
        }

        Ok(())
    }

    fn transmit(&mut self, n: usize) -> Result<(), SimulationError> {
        let transmission = self.scenario.transmissions[n].clone();
        let sender = transmission.sender;
        let now = self.sim_time;

        let state = self.nodes[sender].phy.radio_state();
        if state != RadioState::Tx {
            self.log_content(
                LogContent::TransmissionRefused {
                    sender_id: sender,
                    state,
                },
                LogLevel::Error,
            );
            return Ok(());
        }

        let id = self.next_frame_id;
        self.next_frame_id += 1;

        let signal = Signal::rectangular(
            now,
            transmission.duration,
            transmission.power,
            transmission.bitrate,
        );

        self.transmissions.push(TransmissionRecord {
            id,
            sender,
            start_time: signal.sending_start(),
            end_time: signal.sending_end(),
            channel: transmission.channel,
        });
        self.log_content(
            LogContent::FrameSent {
                sender_id: sender,
                frame_id: id,
            },
            LogLevel::Info,
        );

        let sender_position = self.nodes[sender].position;
        for receiver in (0..self.nodes.len()).filter(|&r| r != sender) {
            let node = &self.nodes[receiver];

            // Every receiver gets its own copy to attenuate.
            let mut signal = signal.clone();
            let delay = if node.use_propagation_delay {
                sender_position.distance(node.position) / SPEED_OF_LIGHT
            } else {
                Time::ZERO
            };
            signal.set_propagation_delay(delay).map_err(PhyError::from)?;

            let start = signal.reception_start();
            self.arrivals
                .insert((receiver, id), (start, signal.reception_end()));
            self.push_event(
                start,
                SimAction::FrameArrival {
                    receiver,
                    frame: Box::new(AirFrame {
                        id,
                        sender,
                        channel: transmission.channel,
                        signal,
                    }),
                },
            );
        }

        Ok(())
    }

    fn schedule_frame_callback(&mut self, receiver: NodeId, frame: FrameId, callback: Callback) {
        if let Callback::Scheduled(time) = callback {
            self.frame_callbacks.insert((receiver, frame), time);
            self.push_event(time, SimAction::ProcessSignal { receiver, frame });
        }
    }

    fn schedule_sense_callback(&mut self, node: NodeId, request: ChannelSenseRequest, time: Time) {
        self.sense_callbacks.insert((node, request.id), time);
        self.push_event(
            time,
            SimAction::SenseRequest {
                node,
                request,
                callback: true,
            },
        );
    }

    fn handle_outputs(&mut self, node: NodeId) {
        let now = self.sim_time;

        for output in self.nodes[node].phy.drain_outputs() {
            match output {
                PhyOutput::SendUp { frame, result } => {
                    let (reception_start, reception_end) = self
                        .arrivals
                        .get(&(node, frame))
                        .copied()
                        .unwrap_or((now, now));

                    self.deliveries.push(Delivery {
                        time: now,
                        receiver: node,
                        frame,
                        reception_start,
                        reception_end,
                        result,
                    });
                    self.log_phy(
                        node,
                        LogContent::FrameDelivered {
                            receiver_id: node,
                            frame_id: frame,
                            correct: result.is_signal_correct(),
                        },
                        LogLevel::Info,
                    );
                }
                PhyOutput::ControlMessage(ControlMessage::ChannelSenseAnswer { request, state }) => {
                    self.sense_answers.push(SenseAnswer {
                        time: now,
                        node,
                        request,
                        state,
                    });
                    self.log_phy(
                        node,
                        LogContent::ChannelSenseAnswered {
                            node_id: node,
                            request_id: request.id,
                            idle: state.idle,
                        },
                        LogLevel::Debug,
                    );
                }
                PhyOutput::Rejected { frame, reason } => {
                    let content = match reason {
                        Rejection::TooWeak => LogContent::FrameTooWeak {
                            receiver_id: node,
                            frame_id: frame,
                        },
                        Rejection::Busy => LogContent::FrameIgnoredBusy {
                            receiver_id: node,
                            frame_id: frame,
                        },
                    };
                    self.log_phy(node, content, LogLevel::Debug);
                }
                PhyOutput::RescheduleSense { request, time } => {
                    if let Some(pending) = self.nodes[node].phy.decider().pending_sense_request() {
                        if pending.id == request {
                            self.schedule_sense_callback(node, pending, time);
                        }
                    }
                }
                PhyOutput::CancelFrameCallback { frame } => {
                    self.frame_callbacks.remove(&(node, frame));
                    self.log_phy(
                        node,
                        LogContent::ReceptionAborted {
                            receiver_id: node,
                            frame_id: frame,
                        },
                        LogLevel::Debug,
                    );
                }
                PhyOutput::Scalar { name, value } => {
                    self.scalars.push(Scalar { node, name, value });
                }
            }
        }
    }

    /// Collects the statistics of every node and hands out the results.
    pub fn finish(mut self, simulation_seed: u64) -> SimOutput {
        let now = self.sim_time;
        for node in 0..self.nodes.len() {
            self.nodes[node].phy.finish(now);
            self.handle_outputs(node);
        }

        SimOutput {
            simulation_seed,
            logs: self.logs,
            transmissions: self.transmissions,
            deliveries: self.deliveries,
            sense_answers: self.sense_answers,
            scalars: self.scalars,
        }
    }

    fn log_phy(&mut self, node: NodeId, content: LogContent, level: LogLevel) {
        if self.do_phy_logs {
            self.logs.push(LogItem {
                time: self.sim_time,
                log_level: level,
                source: LogSource::Receiver(node),
                content,
            });
        }
    }

    fn log_content(&mut self, content: LogContent, level: LogLevel) {
        self.logs.push(LogItem {
            time: self.sim_time,
            log_level: level,
            source: LogSource::Simulation,
            content,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analogue_model::{PacketErrorRate, SimplePathloss},
        config::PhyConfig,
        decider::{AcceptancePolicy, DeciderConfig, SenseMode},
        simulation::data_structs::ScheduledTransmission,
    };

    fn base_config() -> PhyConfig {
        PhyConfig {
            decider: DeciderConfig {
                sensitivity: Power::from_dbm(-89.0).mw(),
                policy: AcceptancePolicy::SnrThreshold {
                    snr_threshold: 4.0,
                    busy_threshold: Power::from_dbm(-95.0).mw(),
                },
                header: None,
            },
            analogue_models: vec![
                SimplePathloss::new(2.0, Frequency::from_GHz(2.4))
                    .unwrap()
                    .into(),
            ],
            ..Default::default()
        }
    }

    fn frame(sender: NodeId, start_ms: f64) -> ScheduledTransmission {
        ScheduledTransmission {
            sender,
            start: Time::from_millis(start_ms),
            duration: MILLIS,
            power: 100.0,
            bitrate: 6e6,
            channel: 0,
        }
    }

    fn line_scenario(config: PhyConfig) -> Scenario {
        let mut scenario = Scenario::new(config);
        scenario.add_node(Coord::planar(0.0, 0.0));
        scenario.add_node(Coord::planar(10.0, 0.0));
        scenario.add_node(Coord::planar(20.0, 0.0));
        scenario
    }

    #[test]
    fn single_frame_is_delivered_everywhere() {
        let mut scenario = line_scenario(base_config());
        scenario.transmit(frame(0, 1.0), Time::ZERO);

        let output = run_simulation(1, scenario, true).unwrap();

        assert_eq!(output.transmissions.len(), 1);
        assert_eq!(output.deliveries.len(), 2);
        assert!(output.deliveries.iter().all(|d| d.result.correct));

        let near = output.deliveries.iter().find(|d| d.receiver == 1).unwrap();
        let far = output.deliveries.iter().find(|d| d.receiver == 2).unwrap();
        assert!(near.reception_start < far.reception_start);
        assert_eq!(near.time, near.reception_end);

        assert_eq!(output.scalar(1, "frames_correct"), Some(1.0));
    }

    #[test]
    fn propagation_delay_can_be_disabled() {
        let config = PhyConfig {
            use_propagation_delay: false,
            ..base_config()
        };
        let mut scenario = line_scenario(config);
        scenario.transmit(frame(0, 1.0), Time::ZERO);

        let output = run_simulation(1, scenario, false).unwrap();
        assert!(
            output
                .deliveries
                .iter()
                .all(|d| d.reception_start == Time::from_millis(1.0))
        );
        assert!(output.logs.iter().all(|l| l.source == LogSource::Simulation));
    }

    #[test]
    fn collision_is_not_decoded() {
        let mut scenario = line_scenario(base_config());
        scenario.transmit(frame(0, 1.0), Time::ZERO);
        scenario.transmit(frame(2, 1.5), Time::ZERO);

        let output = run_simulation(3, scenario, true).unwrap();

        // The middle node hears both at the same strength. It locks onto the
        // first one, which is then corrupted by the second.
        let middle: Vec<_> = output.deliveries.iter().filter(|d| d.receiver == 1).collect();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].frame, 0);
        assert!(!middle[0].result.correct);

        assert!(output.logs.iter().any(|l| l.content
            == LogContent::FrameIgnoredBusy {
                receiver_id: 1,
                frame_id: 1
            }));
    }

    #[test]
    fn transmitting_without_tx_radio_is_refused() {
        let mut scenario = line_scenario(base_config());
        scenario.transmissions.push(frame(0, 1.0));

        let output = run_simulation(1, scenario, true).unwrap();
        assert!(output.transmissions.is_empty());
        assert!(output.logs.iter().any(|l| matches!(
            l.content,
            LogContent::TransmissionRefused {
                sender_id: 0,
                state: RadioState::Rx
            }
        )));
    }

    #[test]
    fn leaving_rx_aborts_the_reception() {
        let mut scenario = line_scenario(base_config());
        scenario.transmit(frame(0, 1.0), Time::ZERO);
        scenario.switch_radio(1, Time::from_millis(1.5), RadioState::Sleep);

        let output = run_simulation(1, scenario, true).unwrap();

        assert!(output.deliveries.iter().all(|d| d.receiver != 1));
        assert!(output.logs.iter().any(|l| l.content
            == LogContent::ReceptionAborted {
                receiver_id: 1,
                frame_id: 0
            }));
        assert_eq!(output.scalar(1, "receptions_aborted"), Some(1.0));
    }

    #[test]
    fn sense_request_is_answered_when_channel_frees() {
        let mut scenario = line_scenario(base_config());
        scenario.transmit(frame(0, 1.0), Time::ZERO);
        scenario.sense(
            1,
            Time::from_millis(1.2),
            ChannelSenseRequest {
                id: 7,
                mode: SenseMode::UntilIdle,
                timeout: 10.0 * MILLIS,
            },
        );

        let output = run_simulation(1, scenario, true).unwrap();
        assert_eq!(output.sense_answers.len(), 1);

        let answer = &output.sense_answers[0];
        assert!(answer.state.idle);
        assert!(answer.time < Time::from_millis(11.2));
        assert!(answer.time >= Time::from_millis(2.0));
    }

    #[test]
    fn runs_are_deterministic() {
        let config = PhyConfig {
            analogue_models: vec![
                SimplePathloss::new(2.0, Frequency::from_GHz(2.4))
                    .unwrap()
                    .into(),
                PacketErrorRate::new(0.5).unwrap().into(),
            ],
            ..base_config()
        };

        let build = || {
            let mut scenario = line_scenario(config.clone());
            for n in 0..20 {
                scenario.transmit(frame(n % 3, 2.0 * n as f64), Time::ZERO);
            }
            scenario
        };

        let outcome = |seed| {
            run_simulation(seed, build(), false)
                .unwrap()
                .deliveries
                .iter()
                .map(|d| (d.receiver, d.frame))
                .collect::<Vec<_>>()
        };

        assert_eq!(outcome(11), outcome(11));
        assert_ne!(outcome(11), outcome(12));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut scenario = line_scenario(base_config());
        scenario.switch_radio(9, MILLIS, RadioState::Tx);
        assert!(matches!(
            Simulation::new(scenario, 0, false),
            Err(SimulationError::UnknownNode(9))
        ));
    }
}
