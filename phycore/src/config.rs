//! Physical layer configuration and its persistence.
//!
//! Files are read as JSON first and as MessagePack if that fails to parse.

use rmp_serde::{decode, encode};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
};
use thiserror::Error;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    analogue_model::AnalogueModel,
    decider::DeciderConfig,
    radio::RadioConfig,
    units::{Power, Time},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{model}: {parameter} = {value} is out of range")]
    InvalidParameter {
        model: &'static str,
        parameter: &'static str,
        value: f64,
    },
    #[error("{0} can not be used on a torus playground")]
    TorusUnsupported(&'static str),
    #[error("unknown obstacle type {0:?}")]
    UnknownObstacleType(String),
    #[error("obstacle type {0:?} has a negative or non finite attenuation")]
    InvalidObstacleType(String),
    #[error("the radio can not start while switching")]
    InvalidInitialRadioState,
    #[error("switch time {0} is negative")]
    NegativeSwitchTime(Time),
    #[error("channel {channel} is outside 0..{nb_channels}")]
    InvalidChannel { channel: usize, nb_channels: usize },
}

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    RMPWriteError(#[from] encode::Error),
    #[error(transparent)]
    RMPReadError(#[from] decode::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyConfig {
    pub decider: DeciderConfig,
    /// Applied to every incoming signal in this order.
    pub analogue_models: Vec<AnalogueModel>,
    pub radio: RadioConfig,
    /// Thermal noise in mW.
    pub noise_floor: f64,
    pub use_propagation_delay: bool,
    /// Attenuate incoming signals by the radio state timeline.
    pub use_radio_gating: bool,
}

impl Default for PhyConfig {
    fn default() -> Self {
        PhyConfig {
            decider: DeciderConfig::default(),
            analogue_models: Vec::new(),
            radio: RadioConfig::default(),
            noise_floor: Power::from_dbm(-110.0).mw(),
            use_propagation_delay: true,
            use_radio_gating: true,
        }
    }
}

impl PhyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decider.validate()?;
        self.radio.validate()?;
        for model in &self.analogue_models {
            model.validate()?;
        }

        if !(self.noise_floor.is_finite() && self.noise_floor >= 0.0) {
            return Err(ConfigError::InvalidParameter {
                model: "PhyConfig",
                parameter: "noise_floor",
                value: self.noise_floor,
            });
        }

        Ok(())
    }
}

pub fn load_file<T>(path: PathBuf) -> Result<T, ConfigFileError>
where
    T: DeserializeOwned,
{
    use serde_json::error::Category;

    let file = File::open(&path)?;
    let buf_reader = BufReader::new(file);

    let json_result: Result<T, _> = serde_json::from_reader(buf_reader);

    json_result.or_else(|err| match err.classify() {
        Category::Io | Category::Eof => Err(err.into()),
        _ => {
            let file = File::open(path)?;
            let buf_reader = BufReader::new(file);
            let res: Result<T, _> = decode::from_read(buf_reader);
            res.map_err(|x| x.into())
        }
    })
}

pub fn write_file<T>(path: PathBuf, object: &T, use_rmp: bool) -> Result<(), ConfigFileError>
where
    T: Serialize,
{
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);

    if use_rmp {
        encode::write(&mut buf, object)?;
    } else {
        serde_json::to_writer_pretty(buf, object)?;
    }

    Ok(())
}

/// Loads a configuration and rejects it if any parameter is out of range.
pub fn load_config(path: PathBuf) -> Result<PhyConfig, ConfigFileError> {
    let config: PhyConfig = load_file(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analogue_model::{
            LogNormalShadowing, NakagamiFading, ObstacleShadowing, PacketErrorRate, SimplePathloss,
        },
        decider::{AcceptancePolicy, HeaderCheck},
        geometry::Coord,
        obstacle::ObstacleControl,
        radio::SwitchTimes,
        units::{Frequency, MICROS, MILLIS},
    };

    fn full_config() -> PhyConfig {
        let mut obstacles = ObstacleControl::default();
        obstacles.add_type("building", 9.0, 0.4);
        obstacles
            .add_obstacle(
                "b",
                "building",
                vec![
                    Coord::planar(0.0, 0.0),
                    Coord::planar(10.0, 0.0),
                    Coord::planar(10.0, 10.0),
                ],
            )
            .unwrap();

        PhyConfig {
            decider: DeciderConfig {
                sensitivity: Power::from_dbm(-89.0).mw(),
                policy: AcceptancePolicy::SnrThreshold {
                    snr_threshold: 3.0,
                    busy_threshold: Power::from_dbm(-95.0).mw(),
                },
                header: Some(HeaderCheck {
                    header_duration: 40.0 * MICROS,
                    snr_threshold: 2.0,
                }),
            },
            analogue_models: vec![
                SimplePathloss::new(2.2, Frequency::from_GHz(5.89)).unwrap().into(),
                LogNormalShadowing::new(0.0, 4.0, 100.0 * MILLIS).unwrap().into(),
                NakagamiFading::new().into(),
                PacketErrorRate::new(0.01).unwrap().into(),
                ObstacleShadowing::new(obstacles, false).unwrap().into(),
            ],
            radio: RadioConfig {
                switch_times: SwitchTimes {
                    rx_to_tx: Some(2.0 * MICROS),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("phycore_{}_{name}", std::process::id()))
    }

    #[test]
    fn default_is_valid() {
        assert_eq!(PhyConfig::default().validate(), Ok(()));
        assert_eq!(full_config().validate(), Ok(()));
    }

    #[test]
    fn invalid_models_are_caught_after_deserialisation() {
        let json = serde_json::to_string(&full_config()).unwrap();
        let broken = json.replace("\"packet_error_rate\":0.01", "\"packet_error_rate\":1.5");
        assert_ne!(json, broken);

        let config: PhyConfig = serde_json::from_str(&broken).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                model: "PacketErrorRate",
                ..
            })
        ));
    }

    #[test]
    fn torus_obstacle_shadowing_is_rejected() {
        let mut config = full_config();
        config.analogue_models.push(
            ObstacleShadowing {
                obstacles: ObstacleControl::default(),
                use_torus: true,
            }
            .into(),
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::TorusUnsupported("ObstacleShadowing"))
        );
    }

    #[test]
    fn negative_noise_is_rejected() {
        let config = PhyConfig {
            noise_floor: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_file_round_trip() {
        let path = temp_path("config.json");
        write_file(path.clone(), &full_config(), false).unwrap();

        let loaded = load_config(path.clone()).unwrap();
        assert_eq!(loaded.analogue_models.len(), 5);
        assert_eq!(loaded.decider, full_config().decider);
        assert_eq!(loaded.radio, full_config().radio);

        let awkward = 3.9999999999999996e-5;
        let text = serde_json::to_string(&awkward).unwrap();
        assert_eq!(serde_json::from_str::<f64>(&text).unwrap(), awkward);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn msgpack_fallback() {
        let path = temp_path("config.rmp");
        write_file(path.clone(), &full_config(), true).unwrap();

        let loaded: PhyConfig = load_file(path.clone()).unwrap();
        assert_eq!(loaded.radio.switch_times.rx_to_tx, Some(2.0 * MICROS));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file() {
        let result: Result<PhyConfig, _> = load_file(temp_path("does_not_exist"));
        assert!(matches!(result, Err(ConfigFileError::IOError(_))));
    }
}
