use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

use super::ImplAnalogueModel;
use crate::{config::ConfigError, geometry::Coord, signal::Signal, units::Length};

/// Below this distance the channel is assumed to have a line of sight.
const LINE_OF_SIGHT_DISTANCE: Length = Length::from_metres(80.0);
const M_CLOSE: f64 = 1.5;
const M_FAR: f64 = 0.75;

/// Fast fading with Nakagami distributed received power.
///
/// One draw per signal, the mean is the peak transmission power and the
/// result is capped at it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NakagamiFading {
    /// Shape parameter used regardless of distance when set.
    pub constant_m: Option<f64>,
}

impl NakagamiFading {
    pub fn new() -> Self {
        NakagamiFading { constant_m: None }
    }

    pub fn with_constant_m(m: f64) -> Result<Self, ConfigError> {
        let model = NakagamiFading {
            constant_m: Some(m),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn shape(&self, distance: Length) -> f64 {
        match self.constant_m {
            Some(m) => m,
            None if distance < LINE_OF_SIGHT_DISTANCE => M_CLOSE,
            None => M_FAR,
        }
    }
}

impl ImplAnalogueModel for NakagamiFading {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        sender: &Coord,
        receiver: &Coord,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        let peak = signal
            .transmission_power()
            .find_max(signal.sending_start(), signal.sending_end())
            .unwrap_or(0.0);

        if peak <= 0.0 {
            signal.add_uniform_attenuation(1.0);
            return Ok(());
        }

        let m = self.shape(sender.distance(*receiver));
        let gamma = Gamma::new(m, peak / m).map_err(|_| ConfigError::InvalidParameter {
            model: "NakagamiFading",
            parameter: "m",
            value: m,
        })?;
        let faded = gamma.sample(rng);

        signal.add_uniform_attenuation(faded.min(peak) / peak);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.constant_m {
            Some(m) if !(m.is_finite() && m > 0.0) => Err(ConfigError::InvalidParameter {
                model: "NakagamiFading",
                parameter: "constant_m",
                value: m,
            }),
            _ => Ok(()),
        }
    }
}
