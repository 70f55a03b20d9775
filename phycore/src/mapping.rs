//! Time (and optionally frequency) indexed functions.
//!
//! A [`Mapping`] is defined by key entries. Between keys the value is
//! interpolated according to its [`Interpolation`]. Outside of its keys a
//! mapping clamps: before the first key it takes the first key's value and
//! after the last key the last key's value. A mapping without any keys is
//! zero everywhere.
//!
//! All times are absolute simulation times, never relative to the start of
//! a signal.

use serde::{Deserialize, Serialize};

use crate::units::{Frequency, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    /// Right continuous step function, the value of the last key at or before `t`.
    #[default]
    Step,
    Linear,
}

/// Position to evaluate a mapping at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Argument {
    pub time: Time,
    pub frequency: Option<Frequency>,
}

impl Argument {
    pub fn at(time: Time) -> Self {
        Self {
            time,
            frequency: None,
        }
    }

    pub fn with_frequency(time: Time, frequency: Frequency) -> Self {
        Self {
            time,
            frequency: Some(frequency),
        }
    }
}

impl From<Time> for Argument {
    fn from(value: Time) -> Self {
        Argument::at(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct KeyEntry {
    time: Time,
    value: f64,
}

/// Keys for one frequency. A time only mapping has a single row without frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    frequency: Option<Frequency>,
    keys: Vec<KeyEntry>,
}

impl Row {
    fn new(frequency: Option<Frequency>) -> Self {
        Self {
            frequency,
            keys: Vec::new(),
        }
    }

    fn set(&mut self, time: Time, value: f64) {
        let pos = self.keys.partition_point(|k| k.time < time);
        match self.keys.get_mut(pos) {
            Some(key) if key.time == time => key.value = value,
            _ => self.keys.insert(pos, KeyEntry { time, value }),
        }
    }

    fn value_at(&self, time: Time, interpolation: Interpolation) -> f64 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };

        let after = self.keys.partition_point(|k| k.time <= time);
        if after == 0 {
            return first.value;
        }

        let before = self.keys[after - 1];
        let Some(next) = self.keys.get(after) else {
            return before.value;
        };

        match interpolation {
            Interpolation::Step => before.value,
            Interpolation::Linear => {
                let span = next.time - before.time;
                let frac = (time - before.time) / span;
                before.value + (next.value - before.value) * frac
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    interpolation: Interpolation,
    rows: Vec<Row>,
}

impl Default for Mapping {
    fn default() -> Self {
        Self::new(Interpolation::Step)
    }
}

impl Mapping {
    /// An empty time only mapping. Zero until keys are set.
    pub fn new(interpolation: Interpolation) -> Self {
        Self {
            interpolation,
            rows: vec![Row::new(None)],
        }
    }

    /// Same value at every position.
    pub fn constant(value: f64) -> Self {
        let mut mapping = Self::new(Interpolation::Step);
        mapping.set(Time::ZERO, value);
        mapping
    }

    /// `value` from `start` on and zero from `end` on.
    ///
    /// Because of clamping the mapping also reports `value` before `start`.
    /// [`crate::signal::Signal`] only evaluates power inside its window.
    pub fn rectangle(start: Time, end: Time, value: f64) -> Self {
        let mut mapping = Self::new(Interpolation::Step);
        mapping.set(start, value);
        mapping.set(end, 0.0);
        mapping
    }

    /// Builds a time only mapping from `(time, value)` pairs in any order.
    pub fn from_keys(interpolation: Interpolation, keys: impl IntoIterator<Item = (Time, f64)>) -> Self {
        let mut mapping = Self::new(interpolation);
        for (time, value) in keys {
            mapping.set(time, value);
        }
        mapping
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn is_frequency_indexed(&self) -> bool {
        self.rows.iter().any(|row| row.frequency.is_some())
    }

    /// Sets a key in the time only row.
    pub fn set(&mut self, time: Time, value: f64) {
        if self.rows.is_empty() {
            self.rows.push(Row::new(None));
        }
        self.rows[0].set(time, value);
    }

    /// Sets a key for a specific frequency, creating the frequency row if needed.
    ///
    /// The first frequency row replaces the time only row if that row is still empty.
    pub fn set_at(&mut self, arg: Argument, value: f64) {
        let Some(frequency) = arg.frequency else {
            self.set(arg.time, value);
            return;
        };

        if self.rows.len() == 1 && self.rows[0].frequency.is_none() && self.rows[0].keys.is_empty() {
            self.rows[0].frequency = Some(frequency);
        }

        let pos = self
            .rows
            .partition_point(|row| row.frequency.is_some_and(|f| f < frequency));

        match self.rows.get_mut(pos) {
            Some(row) if row.frequency == Some(frequency) => row.set(arg.time, value),
            _ => {
                let mut row = Row::new(Some(frequency));
                row.set(arg.time, value);
                self.rows.insert(pos, row);
            }
        }
    }

    /// Value of the time only (or lowest frequency) row at `time`.
    pub fn value_at(&self, time: Time) -> f64 {
        self.rows
            .first()
            .map_or(0.0, |row| row.value_at(time, self.interpolation))
    }

    /// Value at a time and frequency. The frequency selects the row with the
    /// highest frequency at or below it, clamping to the lowest row.
    pub fn value_at_arg(&self, arg: Argument) -> f64 {
        let row = match arg.frequency {
            Some(frequency) if self.is_frequency_indexed() => {
                let after = self
                    .rows
                    .partition_point(|row| row.frequency.is_some_and(|f| f <= frequency));
                self.rows.get(after.saturating_sub(1))
            }
            _ => self.rows.first(),
        };

        row.map_or(0.0, |row| row.value_at(arg.time, self.interpolation))
    }

    /// Every key time of every row, sorted and without duplicates.
    pub fn key_times(&self) -> Vec<Time> {
        let mut times: Vec<Time> = self
            .rows
            .iter()
            .flat_map(|row| row.keys.iter().map(|k| k.time))
            .collect();
        sort_dedup(&mut times);
        times
    }

    /// Key times `t` with `start <= t < end`.
    pub fn key_times_in(&self, start: Time, end: Time) -> Vec<Time> {
        self.key_times()
            .into_iter()
            .filter(|t| *t >= start && *t < end)
            .collect()
    }

    /// A copy of the mapping with every key moved by `delay`.
    pub fn shifted(&self, delay: Time) -> Mapping {
        let mut out = self.clone();
        for row in out.rows.iter_mut() {
            for key in row.keys.iter_mut() {
                key.time = key.time + delay;
            }
        }
        out
    }

    /// Maximum over the closed interval `[start, end]`, `None` if `end < start`.
    pub fn find_max(&self, start: Time, end: Time) -> Option<f64> {
        self.samples_closed(start, end).reduce(f64::max)
    }

    /// Minimum over the closed interval `[start, end]`, `None` if `end < start`.
    pub fn find_min(&self, start: Time, end: Time) -> Option<f64> {
        self.samples_closed(start, end).reduce(f64::min)
    }

    fn samples_closed(&self, start: Time, end: Time) -> impl Iterator<Item = f64> + '_ {
        let mut positions = Vec::new();
        if start <= end {
            positions.push(start);
            positions.extend(
                self.key_times()
                    .into_iter()
                    .filter(|t| *t > start && *t <= end),
            );
            // with linear interpolation the end point can be an extreme too
            if end > start {
                positions.push(end);
            }
        }
        positions.into_iter().map(|t| self.value_at(t))
    }
}

/// Positions where a combination of the passed mappings can change over
/// `[start, end)`: `start` itself plus every key of every mapping inside.
pub fn sample_positions(mappings: &[&Mapping], start: Time, end: Time) -> Vec<Time> {
    let mut times = vec![start];
    for mapping in mappings {
        times.extend(mapping.key_times_in(start, end));
    }
    sort_dedup(&mut times);
    times
}

/// Element wise combination of two mappings over `[start, end)`.
///
/// The result has a key at every position either input can change at. It
/// interpolates linearly if either input does.
pub fn combine<F>(a: &Mapping, b: &Mapping, start: Time, end: Time, op: F) -> Mapping
where
    F: Fn(f64, f64) -> f64,
{
    let interpolation = if a.interpolation == Interpolation::Linear
        || b.interpolation == Interpolation::Linear
    {
        Interpolation::Linear
    } else {
        Interpolation::Step
    };

    Mapping::from_keys(
        interpolation,
        sample_positions(&[a, b], start, end)
            .into_iter()
            .map(|t| (t, op(a.value_at(t), b.value_at(t)))),
    )
}

pub fn multiply(a: &Mapping, b: &Mapping, start: Time, end: Time) -> Mapping {
    combine(a, b, start, end, |x, y| x * y)
}

pub fn add(a: &Mapping, b: &Mapping, start: Time, end: Time) -> Mapping {
    combine(a, b, start, end, |x, y| x + y)
}

/// Division where a zero denominator maps to infinity for a positive
/// numerator and to zero otherwise.
pub fn divide(a: &Mapping, b: &Mapping, start: Time, end: Time) -> Mapping {
    combine(a, b, start, end, |x, y| {
        if y == 0.0 {
            if x > 0.0 { f64::INFINITY } else { 0.0 }
        } else {
            x / y
        }
    })
}

fn sort_dedup(times: &mut Vec<Time>) {
    times.sort_by(|a, b| a.total_cmp(b));
    times.dedup();
}
