use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
};

use serde::{Deserialize, Serialize};

pub trait Unit: Into<f64> {
    fn inner(self) -> f64 {
        self.into()
    }
}

macro_rules! Quantity {
    ($name: ident) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
        pub struct $name(f64);

        impl From<f64> for $name {
            fn from(value: f64) -> Self {
                $name(value)
            }
        }

        impl From<$name> for f64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Unit for $name {}

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl Add for $name {
            type Output = $name;

            fn add(self, rhs: Self) -> Self::Output {
                $name(self.0 + rhs.0)
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold($name(0.0), |a, b| a + b)
            }
        }

        impl Sub for $name {
            type Output = $name;

            fn sub(self, rhs: Self) -> Self::Output {
                $name(self.0 - rhs.0)
            }
        }

        impl Neg for $name {
            type Output = $name;

            fn neg(self) -> Self::Output {
                $name(-self.0)
            }
        }

        impl Div for $name {
            type Output = f64;

            fn div(self, rhs: Self) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl Div<f64> for $name {
            type Output = $name;

            fn div(self, rhs: f64) -> Self::Output {
                $name(self.0 / rhs)
            }
        }

        impl Mul<f64> for $name {
            type Output = $name;

            fn mul(self, rhs: f64) -> Self::Output {
                $name(self.0 * rhs)
            }
        }

        impl Mul<$name> for f64 {
            type Output = $name;

            fn mul(self, rhs: $name) -> Self::Output {
                $name(self * rhs.0)
            }
        }

        impl $name {
            pub const ZERO: $name = $name(0.0);

            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            /// Total ordering on the underlying float, see [`f64::total_cmp`].
            pub fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.0.total_cmp(&other.0)
            }

            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }
    };
}

macro_rules! DivRelation {
    ($top:ident, $bottom:ident, $result:ident) => {
        impl Div<$bottom> for $top {
            type Output = $result;

            fn div(self, rhs: $bottom) -> Self::Output {
                $result(Into::<f64>::into(self) / rhs.0)
            }
        }

        impl Mul<$result> for $bottom {
            type Output = $top;

            fn mul(self, rhs: $result) -> Self::Output {
                (self.0 * rhs.0).into()
            }
        }

        impl Mul<$bottom> for $result {
            type Output = $top;

            fn mul(self, rhs: $bottom) -> Self::Output {
                (self.0 * rhs.0).into()
            }
        }
    };
}

Quantity!(Length);
pub const METRES: Length = Length::from_metres(1.0);
impl Length {
    pub const fn from_metres(n: f64) -> Self {
        Length(n)
    }

    pub fn metres(self) -> f64 {
        self.0
    }
}

Quantity!(Time);
pub const SECONDS: Time = Time::from_seconds(1.0);
pub const MILLIS: Time = Time::from_millis(1.0);
pub const MICROS: Time = Time::from_seconds(1e-6);
impl Time {
    pub const fn from_seconds(n: f64) -> Self {
        Time(n)
    }

    pub const fn from_millis(n: f64) -> Self {
        Time(n / 1000.0)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn millis(self) -> f64 {
        self.0 * 1000.0
    }
}

Quantity!(Frequency);
impl Frequency {
    pub const fn from_hz(n: f64) -> Self {
        Frequency(n)
    }

    #[allow(non_snake_case)]
    pub const fn from_MHz(n: f64) -> Self {
        Frequency(n * 1e6)
    }

    #[allow(non_snake_case)]
    pub const fn from_GHz(n: f64) -> Self {
        Frequency(n * 1e9)
    }

    pub fn hz(self) -> f64 {
        self.0
    }

    /// Free space wavelength of an electromagnetic wave at this frequency.
    pub fn wavelength(self) -> Length {
        SPEED_OF_LIGHT / self
    }
}

Quantity!(Speed);
impl Speed {
    pub const fn from_metres_per_second(n: f64) -> Self {
        Speed(n)
    }
}

/// Speed of light in vacuum.
pub const SPEED_OF_LIGHT: Speed = Speed::from_metres_per_second(299_792_458.0);

DivRelation!(Speed, Frequency, Length);
DivRelation!(Length, Speed, Time);

// Power is stored linearly in milliwatts, which is also the unit of every
// power mapping carried by a signal.
Quantity!(Power);
impl Power {
    pub const fn from_mw(n: f64) -> Self {
        Power(n)
    }

    pub fn from_dbm(dbm: f64) -> Self {
        Power(10f64.powf(dbm / 10.0))
    }

    pub fn mw(self) -> f64 {
        self.0
    }

    /// Zero power maps to negative infinity.
    pub fn dbm(self) -> f64 {
        10.0 * self.0.log10()
    }
}

/// Converts a decibel value to its linear ratio.
pub fn db_to_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Converts a linear ratio to decibels.
pub fn ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}
