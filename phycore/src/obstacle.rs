//! Polygon obstacles in the horizontal plane and the attenuation a straight
//! line of sight suffers when it passes through them.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    geometry::{Coord, point_in_polygon, segments_intersect_at},
    units::db_to_ratio,
};

/// Cached attenuations are dropped once this many have piled up.
const CACHE_LIMIT: usize = 1000;

/// Once the product of factors falls below this the signal is gone anyway.
const NEGLIGIBLE_FACTOR: f64 = 1e-30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ObstacleType {
    pub per_cut_db: f64,
    pub per_metre_db: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: String,
    pub kind: String,
    shape: Vec<Coord>,
    per_cut_db: f64,
    per_metre_db: f64,
    bbox_min: Coord,
    bbox_max: Coord,
}

impl Obstacle {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, shape: Vec<Coord>, attenuation: ObstacleType) -> Self {
        let mut bbox_min = shape.first().copied().unwrap_or_default();
        let mut bbox_max = bbox_min;
        for c in &shape {
            bbox_min.x = bbox_min.x.min(c.x);
            bbox_min.y = bbox_min.y.min(c.y);
            bbox_max.x = bbox_max.x.max(c.x);
            bbox_max.y = bbox_max.y.max(c.y);
        }

        Obstacle {
            id: id.into(),
            kind: kind.into(),
            shape,
            per_cut_db: attenuation.per_cut_db,
            per_metre_db: attenuation.per_metre_db,
            bbox_min,
            bbox_max,
        }
    }

    pub fn shape(&self) -> &[Coord] {
        &self.shape
    }

    /// Whether the bounding boxes of this obstacle and of the segment overlap.
    pub fn may_intersect(&self, a: &Coord, b: &Coord) -> bool {
        a.x.max(b.x) >= self.bbox_min.x
            && a.x.min(b.x) <= self.bbox_max.x
            && a.y.max(b.y) >= self.bbox_min.y
            && a.y.min(b.y) <= self.bbox_max.y
    }

    /// Multiplicative factor for a straight line from `sender` to `receiver`.
    ///
    /// Every wall crossed costs `per_cut_db`, every metre spent inside costs
    /// `per_metre_db`.
    pub fn attenuation(&self, sender: &Coord, receiver: &Coord) -> f64 {
        if self.shape.len() < 2 {
            return 1.0;
        }

        let crossings: Vec<f64> = self
            .shape
            .iter()
            .zip(self.shape.iter().cycle().skip(1))
            .filter_map(|(a, b)| segments_intersect_at(*sender, *receiver, *a, *b))
            .collect();
        let num_cuts = crossings.len();

        // vertex hits count on both edges, so pieces are classified by midpoint
        let mut cuts = crossings;
        cuts.extend([0.0, 1.0]);
        cuts.sort_by(f64::total_cmp);
        cuts.dedup();

        let inside: f64 = cuts
            .windows(2)
            .filter(|piece| {
                let middle = sender.point_lerp((piece[0] + piece[1]) / 2.0, *receiver);
                point_in_polygon(middle, &self.shape)
            })
            .map(|piece| piece[1] - piece[0])
            .sum();

        if num_cuts == 0 && inside == 0.0 {
            return 1.0;
        }

        let distance = sender.distance(*receiver).metres();
        let attenuation_db = self.per_cut_db * num_cuts as f64 + self.per_metre_db * inside * distance;

        db_to_ratio(-attenuation_db)
    }
}

type CacheKey = [u64; 6];

fn cache_key(sender: &Coord, receiver: &Coord) -> CacheKey {
    [
        sender.x.to_bits(),
        sender.y.to_bits(),
        sender.z.to_bits(),
        receiver.x.to_bits(),
        receiver.y.to_bits(),
        receiver.z.to_bits(),
    ]
}

/// The set of obstacles on the playground plus the attenuation per type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObstacleControl {
    types: BTreeMap<String, ObstacleType>,
    obstacles: Vec<Obstacle>,
    #[serde(skip)]
    cache: RefCell<HashMap<CacheKey, f64>>,
}

impl ObstacleControl {
    pub fn add_type(&mut self, kind: impl Into<String>, per_cut_db: f64, per_metre_db: f64) {
        self.types.insert(
            kind.into(),
            ObstacleType {
                per_cut_db,
                per_metre_db,
            },
        );
    }

    pub fn add_obstacle(
        &mut self,
        id: impl Into<String>,
        kind: &str,
        shape: Vec<Coord>,
    ) -> Result<(), ConfigError> {
        let attenuation = *self
            .types
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownObstacleType(kind.to_owned()))?;

        self.obstacles.push(Obstacle::new(id, kind, shape, attenuation));
        self.cache.get_mut().clear();
        Ok(())
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, att) in &self.types {
            if !(att.per_cut_db.is_finite() && att.per_cut_db >= 0.0) {
                return Err(ConfigError::InvalidObstacleType(kind.clone()));
            }
            if !(att.per_metre_db.is_finite() && att.per_metre_db >= 0.0) {
                return Err(ConfigError::InvalidObstacleType(kind.clone()));
            }
        }
        for obstacle in &self.obstacles {
            if !self.types.contains_key(&obstacle.kind) {
                return Err(ConfigError::UnknownObstacleType(obstacle.kind.clone()));
            }
        }
        Ok(())
    }

    /// Product of the attenuations of every obstacle between the two points.
    pub fn calculate_attenuation(&self, sender: &Coord, receiver: &Coord) -> f64 {
        let key = cache_key(sender, receiver);
        if let Some(factor) = self.cache.borrow().get(&key) {
            return *factor;
        }

        let mut factor = 1.0;
        for obstacle in &self.obstacles {
            if !obstacle.may_intersect(sender, receiver) {
                continue;
            }
            factor *= obstacle.attenuation(sender, receiver);
            if factor < NEGLIGIBLE_FACTOR {
                factor = 0.0;
                break;
            }
        }

        let mut cache = self.cache.borrow_mut();
        if cache.len() >= CACHE_LIMIT {
            log::debug!("obstacle attenuation cache full, clearing {} entries", cache.len());
            cache.clear();
        }
        cache.insert(key, factor);

        factor
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}
