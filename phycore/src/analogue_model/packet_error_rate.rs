use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ImplAnalogueModel;
use crate::{config::ConfigError, geometry::Coord, signal::Signal};

/// Drops whole signals with a fixed probability by zeroing their power.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketErrorRate {
    pub packet_error_rate: f64,
}

impl PacketErrorRate {
    pub fn new(packet_error_rate: f64) -> Result<Self, ConfigError> {
        let model = PacketErrorRate { packet_error_rate };
        model.validate()?;
        Ok(model)
    }
}

impl ImplAnalogueModel for PacketErrorRate {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        _sender: &Coord,
        _receiver: &Coord,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        let factor = if rng.random::<f64>() < self.packet_error_rate {
            0.0
        } else {
            1.0
        };
        signal.add_uniform_attenuation(factor);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.packet_error_rate) {
            return Err(ConfigError::InvalidParameter {
                model: "PacketErrorRate",
                parameter: "packet_error_rate",
                value: self.packet_error_rate,
            });
        }
        Ok(())
    }
}
