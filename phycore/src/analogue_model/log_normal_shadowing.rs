use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::ImplAnalogueModel;
use crate::{
    config::ConfigError,
    geometry::Coord,
    mapping::{Interpolation, Mapping},
    signal::Signal,
    units::{Time, db_to_ratio},
};

/// Slow fading that changes every `interval` over the reception.
///
/// Each interval gets an independent normally distributed loss in dB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogNormalShadowing {
    pub mean_db: f64,
    pub std_dev_db: f64,
    pub interval: Time,
}

impl LogNormalShadowing {
    pub fn new(mean_db: f64, std_dev_db: f64, interval: Time) -> Result<Self, ConfigError> {
        let model = LogNormalShadowing {
            mean_db,
            std_dev_db,
            interval,
        };
        model.validate()?;
        Ok(model)
    }

    fn random_gain<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let z: f64 = StandardNormal.sample(rng);
        db_to_ratio(-(self.mean_db + self.std_dev_db * z))
    }
}

impl ImplAnalogueModel for LogNormalShadowing {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        _sender: &Coord,
        _receiver: &Coord,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        let start = signal.reception_start();
        let end = signal.reception_end();

        let mut mapping = Mapping::new(Interpolation::Step);
        let mut time = start;
        let mut step = 0.0;
        while time < end {
            mapping.set(time, self.random_gain(rng));
            step += 1.0;
            time = start + step * self.interval;
        }

        signal.add_attenuation(mapping);
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.mean_db.is_finite() {
            return Err(ConfigError::InvalidParameter {
                model: "LogNormalShadowing",
                parameter: "mean_db",
                value: self.mean_db,
            });
        }
        if !(self.std_dev_db.is_finite() && self.std_dev_db >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                model: "LogNormalShadowing",
                parameter: "std_dev_db",
                value: self.std_dev_db,
            });
        }
        if !(self.interval.is_finite() && self.interval > Time::ZERO) {
            return Err(ConfigError::InvalidParameter {
                model: "LogNormalShadowing",
                parameter: "interval",
                value: self.interval.seconds(),
            });
        }
        Ok(())
    }
}
