//! Attenuation filters applied to every signal a receiver gets.
//!
//! Each model adds exactly one attenuation to the signal and depends only on
//! the signal, the two antenna positions and the simulation random stream,
//! so the order models are applied in does not change the received power.

pub mod log_normal_shadowing;
pub mod nakagami_fading;
pub mod obstacle_shadowing;
pub mod packet_error_rate;
pub mod simple_pathloss;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, geometry::Coord, signal::Signal};

pub use log_normal_shadowing::LogNormalShadowing;
pub use nakagami_fading::NakagamiFading;
pub use obstacle_shadowing::ObstacleShadowing;
pub use packet_error_rate::PacketErrorRate;
pub use simple_pathloss::SimplePathloss;

macro_rules! analogue_model {
    ($($variant:ident),+) => {

        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub enum AnalogueModel {
            $(
                $variant($variant),
            )*
        }

        impl AnalogueModel {
            /// Adds this model's attenuation to `signal`.
            pub fn filter_signal<R: Rng + ?Sized>(
                &self,
                signal: &mut Signal,
                sender: &Coord,
                receiver: &Coord,
                rng: &mut R,
            ) -> Result<(), ConfigError> {
                match self {
                    $(
                        AnalogueModel::$variant(inner) => inner.filter_signal(signal, sender, receiver, rng),
                    )*
                }
            }

            /// Checks the parameters, needed after deserialisation.
            pub fn validate(&self) -> Result<(), ConfigError> {
                match self {
                    $(
                        AnalogueModel::$variant(inner) => inner.validate(),
                    )*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(
                        AnalogueModel::$variant(_) => stringify!($variant),
                    )*
                }
            }
        }

        $(
        impl From<$variant> for AnalogueModel {
            fn from(value: $variant) -> Self {
                AnalogueModel::$variant(value)
            }
        }
        )*
    };
}

analogue_model!(
    SimplePathloss,
    LogNormalShadowing,
    NakagamiFading,
    PacketErrorRate,
    ObstacleShadowing
);

trait ImplAnalogueModel {
    fn filter_signal<R: Rng + ?Sized>(
        &self,
        signal: &mut Signal,
        sender: &Coord,
        receiver: &Coord,
        rng: &mut R,
    ) -> Result<(), ConfigError>;

    fn validate(&self) -> Result<(), ConfigError>;
}
