use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ImplAnalogueModel;
use crate::{config::ConfigError, geometry::Coord, obstacle::ObstacleControl, signal::Signal};

/// Attenuation by buildings on the direct line between the antennas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleShadowing {
    pub obstacles: ObstacleControl,
    /// Wrapping playgrounds have no single straight line between two points.
    pub use_torus: bool,
}

impl ObstacleShadowing {
    pub fn new(obstacles: ObstacleControl, use_torus: bool) -> Result<Self, ConfigError> {
        let model = ObstacleShadowing {
            obstacles,
            use_torus,
        };
        model.validate()?;
        Ok(model)
    }
}

impl ImplAnalogueModel for ObstacleShadowing {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        sender: &Coord,
        receiver: &Coord,
        _rng: &mut R,
    ) -> Result<(), ConfigError> {
        signal.add_uniform_attenuation(self.obstacles.calculate_attenuation(sender, receiver));
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.use_torus {
            return Err(ConfigError::TorusUnsupported("ObstacleShadowing"));
        }
        self.obstacles.validate()
    }
}
