use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ImplAnalogueModel;
use crate::{
    config::ConfigError,
    geometry::Coord,
    signal::Signal,
    units::Frequency,
};

/// Free space style path loss with a configurable exponent.
///
/// Within one metre of the sender nothing is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplePathloss {
    pub alpha: f64,
    pub carrier_frequency: Frequency,
    /// Size of a wrapping playground, `None` for a flat one.
    pub torus: Option<Coord>,
}

impl SimplePathloss {
    pub fn new(alpha: f64, carrier_frequency: Frequency) -> Result<Self, ConfigError> {
        let model = SimplePathloss {
            alpha,
            carrier_frequency,
            torus: None,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn on_torus(mut self, playground: Coord) -> Self {
        self.torus = Some(playground);
        self
    }

    pub fn attenuation(&self, sender: &Coord, receiver: &Coord) -> f64 {
        let sqr_distance = match self.torus {
            Some(playground) => sender.sqr_torus_distance(*receiver, playground),
            None => sender.sqr_distance(*receiver),
        };

        if sqr_distance <= 1.0 {
            return 1.0;
        }

        let wavelength = self.carrier_frequency.wavelength().metres();
        wavelength * wavelength / (16.0 * PI * PI) * sqr_distance.powf(-self.alpha / 2.0)
    }
}

impl ImplAnalogueModel for SimplePathloss {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        sender: &Coord,
        receiver: &Coord,
        _rng: &mut R,
    ) -> Result<(), ConfigError> {
        signal.add_uniform_attenuation(self.attenuation(sender, receiver));
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(ConfigError::InvalidParameter {
                model: "SimplePathloss",
                parameter: "alpha",
                value: self.alpha,
            });
        }
        if !(self.carrier_frequency.is_finite() && self.carrier_frequency > Frequency::ZERO) {
            return Err(ConfigError::InvalidParameter {
                model: "SimplePathloss",
                parameter: "carrier_frequency",
                value: self.carrier_frequency.hz(),
            });
        }
        Ok(())
    }
}
